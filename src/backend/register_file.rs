use crate::backend::bus::CommonDataBus;
use crate::instructions::instructions::{RegisterType, Tag, WordType, REG_COUNT, RETURN_REG};

#[derive(Clone, Copy, Debug)]
pub(crate) struct RegEntry {
    pub(crate) value: WordType,
    // tag of the in-flight instruction that will supply the next value
    pub(crate) producer: Option<Tag>,
}

// 32 architectural registers, double buffered. Phases read `now`, bus
// propagation and issue write `next`; `flush` publishes next as current.
pub(crate) struct RegisterFile {
    now: [RegEntry; REG_COUNT],
    next: [RegEntry; REG_COUNT],
}

impl RegisterFile {
    pub(crate) fn new() -> RegisterFile {
        let entry = RegEntry {
            value: 0,
            producer: None,
        };
        RegisterFile {
            now: [entry; REG_COUNT],
            next: [entry; REG_COUNT],
        }
    }

    pub(crate) fn get(&self, reg: RegisterType) -> RegEntry {
        self.now[reg as usize]
    }

    // x0 is hard wired to zero and never carries a dependency
    pub(crate) fn set_producer(&mut self, reg: RegisterType, tag: Tag) {
        if reg != 0 {
            self.next[reg as usize].producer = Some(tag);
        }
    }

    // low byte of the designated return value register
    pub(crate) fn ret_value(&self) -> u8 {
        (self.now[RETURN_REG as usize].value as u32 & 0xff) as u8
    }

    pub(crate) fn check_bus(&mut self, commit_bus: &CommonDataBus) {
        for entry in commit_bus.entries() {
            let rd = match entry.dest {
                Some(rd) if rd != 0 => rd as usize,
                _ => continue,
            };
            self.next[rd].value = entry.value;
            // guard against a later issue having re-assigned the producer
            if self.next[rd].producer == Some(entry.tag) {
                self.next[rd].producer = None;
            }
        }
    }

    pub(crate) fn clear_producers(&mut self) {
        for entry in self.next.iter_mut() {
            entry.producer = None;
        }
    }

    pub(crate) fn flush(&mut self) {
        self.now = self.next;
        self.now[0] = RegEntry {
            value: 0,
            producer: None,
        };
    }

    #[cfg(test)]
    pub(crate) fn value(&self, reg: RegisterType) -> WordType {
        self.now[reg as usize].value
    }
}
