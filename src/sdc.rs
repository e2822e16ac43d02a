/*!
    sub-device communication: register reads and writes carried by the SDC slot of the frames

    the board services at most one register operation per frame, and answers it in the frame following the request. The [SdcQueue] holds the operations requested by the application and feeds them one at a time, in insertion order, to the outbound slot.

    lifecycle of an item:

    - enqueued with `request` set, waiting in the queue
    - loaded in the outbound slot, it becomes in flight (`busy` counts the exchanges since its transmission)
    - serviced by the board response: `done` or `error` is set, `request` is cleared
    - observed through [SdcQueue::status]: the item is consumed and its slot can be reused
*/

use crate::{
    frame::SdcSlot,
    registers::SdcAddress,
    };


/// maximum number of items the queue holds at once, consumed items excluded
pub const SDC_CAPACITY: usize = 256;
/// exchanges to wait for an answer before retransmitting
pub const SDC_TIMEOUT: u16 = 8;
/// transmissions of an unanswered item before giving up on it
pub const SDC_RETRIES: u8 = 3;


/// error returned when enqueuing in a full queue
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CapacityExceeded;
impl core::fmt::Display for CapacityExceeded {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "no free slot among the {} sub-device items", SDC_CAPACITY)
    }
}
impl core::error::Error for CapacityExceeded {}

/// one register operation
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SdcItem {
    pub address: SdcAddress,
    /// value to write, or value read once done
    pub value: u16,
    /// scaling to apply when interpreting `value`, unused by the protocol itself
    pub factor: i32,
    /// number of transmissions so far
    pub counter: u8,
    /// exchanges since transmission while in flight, 0 otherwise
    pub busy: u16,
    pub write: bool,
    pub request: bool,
    pub done: bool,
    pub error: bool,
    serial: u32,
    consumed: bool,
}
impl SdcItem {
    pub fn status(&self) -> SdcStatus {
        if self.error
            {SdcStatus::Error}
        else if self.done
            {SdcStatus::Done(self.value)}
        else
            {SdcStatus::Pending}
    }
    fn slot(&self) -> SdcSlot {
        SdcSlot::request(self.address, self.value, self.write)
    }
}

/// reference to an enqueued item, stale once the item is consumed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SdcHandle {
    index: u16,
    serial: u32,
}
impl SdcHandle {
    /// position of the item in the queue
    pub fn index(&self) -> usize {usize::from(self.index)}
}

/// progress of an item
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SdcStatus {
    Pending,
    /// serviced, with the value read or written
    Done(u16),
    /// rejected by the board, or never answered
    Error,
}


/// ordered queue of register operations, serviced one at a time
#[derive(Clone, Debug, Default)]
pub struct SdcQueue {
    /// populated prefix of the slots, consumed items included
    items: heapless::Vec<SdcItem, SDC_CAPACITY>,
    /// indices of items waiting for transmission, in insertion order
    pending: heapless::Deque<u16, SDC_CAPACITY>,
    /// index of the item currently in the outbound slot or waiting for its answer
    in_flight: Option<u16>,
    /// serial of the last enqueued item
    serial: u32,
}

impl SdcQueue {
    pub fn new() -> Self {
        Self::default()
    }
    /// number of populated slots
    pub fn size(&self) -> usize {
        self.items.len()
    }
    /// number of items not serviced yet
    pub fn pending(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }
    pub fn in_flight(&self) -> Option<SdcHandle> {
        self.in_flight.map(|index| self.handle(index))
    }

    /**
        append a register operation

        it takes the slot of a consumed item if any, else a new slot, else the slot of the oldest finished item nobody observed yet, whose handle becomes stale. Only items not serviced yet count against the capacity.
    */
    pub fn enqueue(&mut self, address: SdcAddress, value: u16, write: bool) -> Result<SdcHandle, CapacityExceeded> {
        let index = match self.items.iter().position(|item| item.consumed) {
            Some(index) => index,
            None if ! self.items.is_full() => {
                self.items.push(SdcItem {consumed: true, .. Default::default()})
                    .map_err(|_| CapacityExceeded)?;
                self.items.len() - 1
            },
            None => self.oldest_finished().ok_or(CapacityExceeded)?,
        };
        let index = u16::try_from(index).map_err(|_| CapacityExceeded)?;
        // there is at most one pending entry per unconsumed slot, so this cannot fail after a slot was found
        self.pending.push_back(index).map_err(|_| CapacityExceeded)?;
        self.serial = self.serial.wrapping_add(1);
        self.items[usize::from(index)] = SdcItem {
            address,
            value,
            factor: 1,
            write,
            request: true,
            serial: self.serial,
            .. Default::default()
            };
        Ok(self.handle(index))
    }

    /// index of the finished item enqueued first
    fn oldest_finished(&self) -> Option<usize> {
        let latest = self.serial;
        self.items.iter().enumerate()
            .filter(|(_, item)| ! item.request && (item.done || item.error))
            // serials wrap, the oldest is the furthest behind the latest
            .max_by_key(|(_, item)| latest.wrapping_sub(item.serial))
            .map(|(index, _)| index)
    }

    /// item referenced by the handle, `None` if the handle is stale
    pub fn item(&self, handle: SdcHandle) -> Option<&SdcItem> {
        self.items.get(handle.index())
            .filter(|item| item.serial == handle.serial && ! item.consumed)
    }
    fn item_mut(&mut self, handle: SdcHandle) -> Option<&mut SdcItem> {
        self.items.get_mut(handle.index())
            .filter(|item| item.serial == handle.serial && ! item.consumed)
    }

    /**
        non-blocking poll of an item's progress

        once a finished item is reported here it is consumed: its handle becomes stale and its slot free for reuse. Return `None` for a stale handle.
    */
    pub fn status(&mut self, handle: SdcHandle) -> Option<SdcStatus> {
        let item = self.item_mut(handle)?;
        let status = item.status();
        if status != SdcStatus::Pending {
            item.consumed = true;
        }
        Some(status)
    }

    /**
        record the board's verdict on an item

        on success a read item receives the value read, on failure the item is marked `error`. Either way it is no longer in flight and will not be sent again.
        Only the item in flight can be serviced, return `false` for any other handle.
    */
    pub fn mark_serviced(&mut self, handle: SdcHandle, success: bool, value: u16) -> bool {
        if self.in_flight != Some(handle.index)
            {return false}
        let Some(item) = self.item_mut(handle)
            else {return false};
        item.busy = 0;
        item.request = false;
        if success {
            item.done = true;
            if ! item.write
                {item.value = value}
        }
        else {
            item.error = true;
        }
        self.in_flight = None;
        true
    }

    /**
        advance the protocol after one successful frame exchange

        - `request` is the outbound slot just transmitted, it is updated for the next exchange
        - `response` is the inbound slot just received

        return the item serviced during this exchange, if any
    */
    pub fn process(&mut self, request: &mut SdcSlot, response: &SdcSlot) -> Option<(SdcHandle, SdcStatus)> {
        let mut serviced = None;
        if let Some(index) = self.in_flight {
            let handle = self.handle(index);
            let item = &mut self.items[usize::from(index)];
            let answered = ! response.is_idle()
                && response.address() == item.address
                && response.write() == item.write;

            if item.busy == 0 {
                // just transmitted, its answer comes with the next frame
                item.busy = 1;
                *request = SdcSlot::default();
            }
            else if answered {
                self.mark_serviced(handle, ! response.error(), response.value);
                serviced = Some(handle);
            }
            else if item.busy < SDC_TIMEOUT {
                item.busy += 1;
            }
            else if item.counter < SDC_RETRIES {
                item.counter += 1;
                item.busy = 0;
                *request = item.slot();
            }
            else {
                self.mark_serviced(handle, false, 0);
                serviced = Some(handle);
            }
        }
        if self.in_flight.is_none() {
            while let Some(index) = self.pending.pop_front() {
                let item = &mut self.items[usize::from(index)];
                if ! item.request || item.consumed
                    {continue}
                item.counter = 1;
                item.busy = 0;
                *request = item.slot();
                self.in_flight = Some(index);
                break
            }
        }
        serviced.map(|handle| (handle, self.items[handle.index()].status()))
    }

    fn handle(&self, index: u16) -> SdcHandle {
        SdcHandle {index, serial: self.items[usize::from(index)].serial}
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    /// board answering every request in the next frame, rejecting address 0xbad
    struct Board {
        answer: SdcSlot,
        memory: [u16; 0x100],
    }
    impl Board {
        fn new() -> Self {
            Self {answer: SdcSlot::default(), memory: [0; 0x100]}
        }
        fn exchange(&mut self, request: &SdcSlot) -> SdcSlot {
            let mut next = *request;
            if request.is_idle() {
                next = SdcSlot::default();
            }
            else if request.address() == 0xbad {
                next.flags.set_error(true);
            }
            else if request.write() {
                self.memory[usize::from(request.address() & 0xff)] = request.value;
            }
            else {
                next.value = self.memory[usize::from(request.address() & 0xff)];
            }
            core::mem::replace(&mut self.answer, next)
        }
    }

    /// run exchanges until nothing is pending, return the order in which items completed
    fn run(queue: &mut SdcQueue, board: &mut Board, limit: usize) -> heapless::Vec<SdcHandle, 16> {
        let mut request = SdcSlot::default();
        let mut order = heapless::Vec::new();
        for _ in 0 .. limit {
            let response = board.exchange(&request);
            if let Some((handle, _)) = queue.process(&mut request, &response) {
                order.push(handle).unwrap();
            }
            if queue.pending() == 0
                {break}
        }
        order
    }

    #[test]
    fn fifo_order() {
        let mut queue = SdcQueue::new();
        let mut board = Board::new();
        let a = queue.enqueue(0x10, 42, true).unwrap();
        let b = queue.enqueue(0x10, 0, false).unwrap();
        let c = queue.enqueue(0x11, 7, true).unwrap();
        assert_eq!(queue.pending(), 3);

        let order = run(&mut queue, &mut board, 100);
        assert_eq!(order.as_slice(), &[a, b, c]);
        assert_eq!(queue.status(a), Some(SdcStatus::Done(42)));
        // the read sees the write enqueued before it
        assert_eq!(queue.status(b), Some(SdcStatus::Done(42)));
        assert_eq!(queue.status(c), Some(SdcStatus::Done(7)));
    }

    #[test]
    fn one_item_per_exchange() {
        let mut queue = SdcQueue::new();
        let mut board = Board::new();
        let a = queue.enqueue(0x10, 1, true).unwrap();
        let b = queue.enqueue(0x11, 2, true).unwrap();
        let mut request = SdcSlot::default();

        // first exchange only loads the outbound slot
        let response = board.exchange(&request);
        assert_eq!(queue.process(&mut request, &response), None);
        assert_eq!(request.address(), 0x10);
        assert_eq!(queue.in_flight(), Some(a));
        // transmitted, answer expected in the next frame
        let response = board.exchange(&request);
        assert_eq!(queue.process(&mut request, &response), None);
        assert!(request.is_idle());
        assert_eq!(queue.item(a).unwrap().busy, 1);
        assert_eq!(queue.item(b).unwrap().busy, 0);
        // answered, the next item takes the slot
        let response = board.exchange(&request);
        assert_eq!(queue.process(&mut request, &response), Some((a, SdcStatus::Done(1))));
        assert_eq!(request.address(), 0x11);
        assert_eq!(queue.in_flight(), Some(b));
        assert_eq!(queue.status(b), Some(SdcStatus::Pending));
    }

    #[test]
    fn rejected() {
        let mut queue = SdcQueue::new();
        let mut board = Board::new();
        let a = queue.enqueue(0xbad, 1, true).unwrap();
        let b = queue.enqueue(0x12, 3, true).unwrap();
        run(&mut queue, &mut board, 100);
        assert_eq!(queue.status(a), Some(SdcStatus::Error));
        assert_eq!(queue.status(b), Some(SdcStatus::Done(3)));
    }

    #[test]
    fn unanswered_retries_then_fails() {
        let mut queue = SdcQueue::new();
        let a = queue.enqueue(0x10, 1, false).unwrap();
        let mut request = SdcSlot::default();
        let silence = SdcSlot::default();
        let mut transmissions = 0;
        let mut result = None;
        for _ in 0 .. 100 {
            if ! request.is_idle()
                {transmissions += 1}
            if let Some(serviced) = queue.process(&mut request, &silence) {
                result = Some(serviced);
                break
            }
        }
        assert_eq!(result, Some((a, SdcStatus::Error)));
        assert_eq!(transmissions, usize::from(SDC_RETRIES));
        assert_eq!(queue.item(a).unwrap().counter, SDC_RETRIES);
        assert!(! queue.item(a).unwrap().request);
    }

    #[test]
    fn capacity() {
        let mut queue = SdcQueue::new();
        for i in 0 .. SDC_CAPACITY {
            queue.enqueue(0x100, i as u16, true).unwrap();
        }
        assert_eq!(queue.enqueue(0x100, 0, true), Err(CapacityExceeded));
        assert_eq!(queue.size(), SDC_CAPACITY);
        assert_eq!(queue.pending(), SDC_CAPACITY);
    }

    #[test]
    fn consumed_slots_are_reused() {
        let mut queue = SdcQueue::new();
        let mut board = Board::new();
        let a = queue.enqueue(0x10, 5, true).unwrap();
        run(&mut queue, &mut board, 100);
        // not observed yet, the slot stays busy
        let b = queue.enqueue(0x11, 6, true).unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(queue.status(a), Some(SdcStatus::Done(5)));
        // observed, the handle is stale and its slot reused
        assert_eq!(queue.status(a), None);
        let c = queue.enqueue(0x12, 7, true).unwrap();
        assert_eq!(c.index(), a.index());
        assert_eq!(queue.status(a), None);
        assert_eq!(queue.size(), 2);

        let order = run(&mut queue, &mut board, 100);
        assert_eq!(order.as_slice(), &[b, c]);
    }

    #[test]
    fn unobserved_items_are_evicted() {
        let mut queue = SdcQueue::new();
        let mut board = Board::new();
        let first = queue.enqueue(0x10, 0, true).unwrap();
        // writes nobody polls never exhaust the queue
        for i in 0 .. 2 * SDC_CAPACITY {
            queue.enqueue(0x10, i as u16, true).unwrap();
            run(&mut queue, &mut board, 10);
            assert_eq!(queue.pending(), 0);
        }
        assert_eq!(queue.size(), SDC_CAPACITY);
        assert_eq!(queue.status(first), None);

        // pending items are never evicted
        for i in 0 .. SDC_CAPACITY {
            queue.enqueue(0x11, i as u16, true).unwrap();
        }
        assert_eq!(queue.enqueue(0x11, 0, true), Err(CapacityExceeded));
        assert_eq!(queue.pending(), SDC_CAPACITY);
    }

    #[test]
    fn only_in_flight_is_serviced() {
        let mut queue = SdcQueue::new();
        let a = queue.enqueue(0x10, 1, true).unwrap();
        let b = queue.enqueue(0x11, 2, true).unwrap();
        let mut request = SdcSlot::default();
        queue.process(&mut request, &SdcSlot::default());
        assert_eq!(queue.in_flight(), Some(a));

        // a queued item cannot be serviced out of order
        assert!(! queue.mark_serviced(b, true, 0));
        assert_eq!(queue.status(b), Some(SdcStatus::Pending));
        assert!(queue.mark_serviced(a, true, 0));
        assert_eq!(queue.in_flight(), None);
        assert!(! queue.mark_serviced(a, true, 0));
        assert_eq!(queue.status(a), Some(SdcStatus::Done(1)));

        let mut board = Board::new();
        let order = run(&mut queue, &mut board, 100);
        assert_eq!(order.as_slice(), &[b]);
    }
}
