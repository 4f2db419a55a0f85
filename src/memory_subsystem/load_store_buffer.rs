use std::collections::VecDeque;

use log::trace;

use crate::backend::bus::CommonDataBus;
use crate::cpu::ExecutionError;
use crate::instructions::instructions::{mnemonic, Opcode, Tag, WordType};
use crate::memory_subsystem::memory::Memory;

#[derive(Clone, Copy, Debug)]
struct LsbEntry {
    opcode: Opcode,
    addr: u32,
    value: WordType,
    tag: Tag,
    // loads enter ready; stores wait for their commit broadcast
    ready: bool,
}

impl LsbEntry {
    fn is_store(&self) -> bool {
        matches!(self.opcode, Opcode::SB | Opcode::SH | Opcode::SW)
    }
}

fn access_width(opcode: Opcode) -> u32 {
    match opcode {
        Opcode::LB | Opcode::LBU | Opcode::SB => 1,
        Opcode::LH | Opcode::LHU | Opcode::SH => 2,
        Opcode::LW | Opcode::SW => 4,
        _ => panic!("{} is not a memory operation", mnemonic(opcode)),
    }
}

fn extend_load(opcode: Opcode, raw: u32) -> WordType {
    match opcode {
        Opcode::LB => raw as u8 as i8 as WordType,
        Opcode::LBU => raw as u8 as WordType,
        Opcode::LH => raw as u16 as i16 as WordType,
        Opcode::LHU => raw as u16 as WordType,
        Opcode::LW => raw as WordType,
        _ => panic!("{} is not a load", mnemonic(opcode)),
    }
}

// FIFO in front of memory. Queued stores let younger loads complete early:
// a load fully covered by the nearest older store takes its value off the
// queue and never touches memory.
pub(crate) struct LoadStoreBuffer {
    now: VecDeque<LsbEntry>,
    next: VecDeque<LsbEntry>,
    capacity: usize,
    latency: i32,
    // cycles until the head access completes; -1 when idle
    countdown: i32,
    trace_access: bool,
}

impl LoadStoreBuffer {
    pub(crate) fn new(capacity: usize, latency: i32) -> LoadStoreBuffer {
        LoadStoreBuffer {
            now: VecDeque::with_capacity(capacity),
            next: VecDeque::with_capacity(capacity),
            capacity,
            latency,
            countdown: -1,
            trace_access: false,
        }
    }

    pub(crate) fn with_trace(capacity: usize, latency: i32, trace_access: bool) -> LoadStoreBuffer {
        let mut lsb = LoadStoreBuffer::new(capacity, latency);
        lsb.trace_access = trace_access;
        lsb
    }

    pub(crate) fn has_space(&self) -> bool {
        self.next.len() < self.capacity
    }

    pub(crate) fn size(&self) -> usize {
        self.now.len()
    }

    // Accepts a dispatched memory operation. Stores are enqueued unready and
    // broadcast their tag so the reorder buffer can retire them; the data
    // goes to memory only after the commit broadcast arrives. Loads try the
    // queued stores first.
    pub(crate) fn execute(
        &mut self,
        opcode: Opcode,
        addr: u32,
        value: WordType,
        tag: Tag,
        result_bus: &mut CommonDataBus,
    ) {
        let entry = LsbEntry {
            opcode,
            addr,
            value,
            tag,
            ready: false,
        };
        if entry.is_store() {
            self.next.push_back(entry);
            result_bus.put_on_bus(tag, 0);
            return;
        }

        // wrong path addresses can sit at the end of the address space, so
        // the range arithmetic is done in u64
        let load_end = addr as u64 + access_width(opcode) as u64;
        // youngest overlapping store wins
        for e in self.now.iter().rev() {
            if !e.is_store() {
                continue;
            }
            let store_end = e.addr as u64 + access_width(e.opcode) as u64;
            let overlaps = (addr as u64) < store_end && (e.addr as u64) < load_end;
            if !overlaps {
                continue;
            }
            if addr >= e.addr && load_end <= store_end {
                let raw = (e.value as u32) >> (8 * (addr - e.addr));
                result_bus.put_on_bus(tag, extend_load(opcode, raw));
                if self.trace_access {
                    trace!("forward tag={} {} addr={:#010x}", tag, mnemonic(opcode), addr);
                }
                return;
            }
            // partial overlap: the load must read memory after the store
            break;
        }

        self.next.push_back(LsbEntry { ready: true, ..entry });
    }

    pub(crate) fn check_bus(&mut self, commit_bus: &CommonDataBus) {
        for entry in self.next.iter_mut() {
            if entry.is_store() && !entry.ready && commit_bus.try_get(entry.tag).is_some() {
                entry.ready = true;
            }
        }
    }

    // Advances the memory access in flight. The head occupies the memory
    // port for `latency` cycles before its access lands.
    pub(crate) fn try_load_store(
        &mut self,
        memory: &mut Memory,
        result_bus: &mut CommonDataBus,
    ) -> Result<(), ExecutionError> {
        if self.countdown > 0 {
            self.countdown -= 1;
            return Ok(());
        }
        if self.now.is_empty() {
            self.countdown = -1;
            return Ok(());
        }

        let mut head_index = 0;
        // a flush may have replaced the entry the countdown was armed for;
        // an unready store at the head must not reach memory
        if self.countdown == 0 && self.now[0].ready {
            let head = self.now[0];
            if self.trace_access {
                trace!(
                    "access tag={} {} addr={:#010x}",
                    head.tag,
                    mnemonic(head.opcode),
                    head.addr
                );
            }
            match head.opcode {
                Opcode::SB => memory.store_byte(head.addr, head.value as u8)?,
                Opcode::SH => memory.store_half(head.addr, head.value as u16)?,
                Opcode::SW => memory.store_word(head.addr, head.value as u32)?,
                _ => {
                    let raw = match access_width(head.opcode) {
                        1 => memory.load_byte(head.addr)? as u32,
                        2 => memory.load_half(head.addr)? as u32,
                        _ => memory.load_word(head.addr)?,
                    };
                    result_bus.put_on_bus(head.tag, extend_load(head.opcode, raw));
                }
            }
            self.next.pop_front();
            head_index = 1;
        }

        let next_ready = self.now.get(head_index).map_or(false, |e| e.ready);
        self.countdown = if next_ready { self.latency } else { -1 };
        Ok(())
    }

    // Speculation discard. Committed stores stay queued, their memory write
    // is architectural; everything else is dropped. An armed countdown
    // survives only when the head it was armed for is such a store and is
    // still the head afterwards.
    pub(crate) fn clear(&mut self) {
        self.next.retain(|e| e.is_store() && e.ready);
        let continuing = match (self.now.front(), self.next.front()) {
            (Some(a), Some(b)) => a.tag == b.tag && a.is_store() && a.ready,
            _ => false,
        };
        if !continuing {
            self.countdown = -1;
        }
    }

    pub(crate) fn flush(&mut self) {
        self.now = self.next.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_cycles(
        lsb: &mut LoadStoreBuffer,
        mem: &mut Memory,
        bus: &mut CommonDataBus,
        cycles: usize,
    ) {
        for _ in 0..cycles {
            lsb.try_load_store(mem, bus).unwrap();
            lsb.flush();
        }
    }

    #[test]
    fn test_store_waits_for_commit_then_writes() {
        let mut lsb = LoadStoreBuffer::new(4, 0);
        let mut mem = Memory::new(64);
        let mut result_bus = CommonDataBus::new(4);
        let mut commit_bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SW, 8, 0x11223344, 1, &mut result_bus);
        assert_eq!(result_bus.try_get(1), Some(0));
        lsb.flush();

        run_cycles(&mut lsb, &mut mem, &mut result_bus, 3);
        assert_eq!(mem.load_word(8).unwrap(), 0);

        commit_bus.put_on_bus(1, 0);
        lsb.check_bus(&commit_bus);
        lsb.flush();

        // arm, then access
        run_cycles(&mut lsb, &mut mem, &mut result_bus, 2);
        assert_eq!(mem.load_word(8).unwrap(), 0x11223344);
        assert_eq!(lsb.size(), 0);
    }

    #[test]
    fn test_load_latency() {
        let mut lsb = LoadStoreBuffer::new(4, 2);
        let mut mem = Memory::new(64);
        let mut bus = CommonDataBus::new(4);
        mem.store_word(4, 77).unwrap();

        lsb.execute(Opcode::LW, 4, 0, 3, &mut bus);
        lsb.flush();

        // arm cycle plus two countdown cycles, the access lands on the fourth
        run_cycles(&mut lsb, &mut mem, &mut bus, 3);
        assert_eq!(bus.try_get(3), None);
        lsb.try_load_store(&mut mem, &mut bus).unwrap();
        assert_eq!(bus.try_get(3), Some(77));
    }

    #[test]
    fn test_forward_from_queued_store() {
        let mut lsb = LoadStoreBuffer::new(4, 3);
        let mut bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SW, 8, 0x11223344, 1, &mut bus);
        lsb.flush();
        bus.clear();

        // byte at 8 + 1 is the second lowest
        lsb.execute(Opcode::LB, 9, 0, 2, &mut bus);
        assert_eq!(bus.try_get(2), Some(0x33));
        // halfword at 8 + 2 is the upper half
        lsb.execute(Opcode::LH, 10, 0, 3, &mut bus);
        assert_eq!(bus.try_get(3), Some(0x1122));
        assert_eq!(lsb.size(), 1);
    }

    #[test]
    fn test_forwarded_byte_sign_extends() {
        let mut lsb = LoadStoreBuffer::new(4, 3);
        let mut bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SB, 8, 0xff, 1, &mut bus);
        lsb.flush();
        bus.clear();

        lsb.execute(Opcode::LB, 8, 0, 2, &mut bus);
        assert_eq!(bus.try_get(2), Some(-1));
        bus.clear();
        lsb.execute(Opcode::LBU, 8, 0, 3, &mut bus);
        assert_eq!(bus.try_get(3), Some(255));
    }

    #[test]
    fn test_partial_overlap_queues_the_load() {
        let mut lsb = LoadStoreBuffer::new(4, 3);
        let mut bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SB, 8, 0x7f, 1, &mut bus);
        lsb.flush();
        bus.clear();

        // word load covering the stored byte cannot be served off the queue
        lsb.execute(Opcode::LW, 8, 0, 2, &mut bus);
        assert_eq!(bus.try_get(2), None);
        lsb.flush();
        assert_eq!(lsb.size(), 2);
    }

    #[test]
    fn test_forwarding_at_address_space_edge() {
        let mut lsb = LoadStoreBuffer::new(4, 3);
        let mut bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SB, u32::MAX, 0x7f, 1, &mut bus);
        lsb.flush();
        bus.clear();

        lsb.execute(Opcode::LB, u32::MAX, 0, 2, &mut bus);
        assert_eq!(bus.try_get(2), Some(0x7f));
        bus.clear();

        // a halfword crossing the end of the address space overlaps the
        // store without being contained in it
        lsb.execute(Opcode::LH, u32::MAX - 1, 0, 3, &mut bus);
        assert_eq!(bus.try_get(3), None);
        lsb.flush();
        assert_eq!(lsb.size(), 2);
    }

    #[test]
    fn test_flush_never_releases_uncommitted_store() {
        let mut lsb = LoadStoreBuffer::new(4, 1);
        let mut mem = Memory::new(64);
        let mut result_bus = CommonDataBus::new(4);
        let mut commit_bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SW, 8, 0x11, 1, &mut result_bus);
        commit_bus.put_on_bus(1, 0);
        lsb.check_bus(&commit_bus);
        lsb.execute(Opcode::LW, 0, 0, 2, &mut result_bus);
        lsb.flush();

        // arm for the committed store, count down, access
        run_cycles(&mut lsb, &mut mem, &mut result_bus, 2);
        lsb.try_load_store(&mut mem, &mut result_bus).unwrap();
        assert_eq!(mem.load_word(8).unwrap(), 0x11);

        // the access cycle re-armed the countdown for the queued load; a
        // flush in the same cycle squashes it and a fresh store arrives
        // whose commit broadcast never comes
        lsb.clear();
        lsb.execute(Opcode::SW, 8, 0x99, 3, &mut result_bus);
        lsb.flush();
        run_cycles(&mut lsb, &mut mem, &mut result_bus, 6);
        assert_eq!(mem.load_word(8).unwrap(), 0x11);
        assert_eq!(lsb.size(), 1);
    }

    #[test]
    fn test_clear_keeps_committed_stores_only() {
        let mut lsb = LoadStoreBuffer::new(4, 3);
        let mut bus = CommonDataBus::new(4);
        let mut commit_bus = CommonDataBus::new(4);

        lsb.execute(Opcode::SW, 0, 1, 1, &mut bus);
        lsb.execute(Opcode::SW, 4, 2, 2, &mut bus);
        lsb.execute(Opcode::LW, 8, 0, 3, &mut bus);
        commit_bus.put_on_bus(1, 0);
        lsb.check_bus(&commit_bus);

        lsb.clear();
        lsb.flush();
        assert_eq!(lsb.size(), 1);
    }
}
