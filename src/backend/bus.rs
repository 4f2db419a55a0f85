use crate::instructions::instructions::{RegisterType, Tag, WordType};

#[derive(Clone, Copy, Debug)]
pub(crate) struct BusEntry {
    pub(crate) tag: Tag,
    pub(crate) value: WordType,
    // set on the commit bus only
    pub(crate) dest: Option<RegisterType>,
    // the value is a resolved jump/branch target, not a register value;
    // register consumers must wait for the commit bus
    pub(crate) target: bool,
}

// Fixed-capacity tagged broadcast slots, append-only within a cycle and
// cleared at cycle end. Overflow means the simulated bus is undersized,
// which is a configuration error, not a runtime hazard.
pub(crate) struct CommonDataBus {
    slots: Vec<BusEntry>,
    capacity: usize,
}

impl CommonDataBus {
    pub(crate) fn new(capacity: usize) -> CommonDataBus {
        CommonDataBus {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn put(&mut self, entry: BusEntry) {
        assert!(
            self.slots.len() < self.capacity,
            "CDB: capacity {} exceeded",
            self.capacity
        );
        self.slots.push(entry);
    }

    pub(crate) fn put_on_bus(&mut self, tag: Tag, value: WordType) {
        self.put(BusEntry {
            tag,
            value,
            dest: None,
            target: false,
        });
    }

    pub(crate) fn put_target_on_bus(&mut self, tag: Tag, value: WordType) {
        self.put(BusEntry {
            tag,
            value,
            dest: None,
            target: true,
        });
    }

    pub(crate) fn put_on_bus_with_dest(&mut self, tag: Tag, value: WordType, dest: RegisterType) {
        self.put(BusEntry {
            tag,
            value,
            dest: Some(dest),
            target: false,
        });
    }

    // matches any broadcast, including targets
    pub(crate) fn try_get(&self, tag: Tag) -> Option<WordType> {
        self.slots.iter().find(|e| e.tag == tag).map(|e| e.value)
    }

    // matches register values only
    pub(crate) fn try_get_value(&self, tag: Tag) -> Option<WordType> {
        self.slots
            .iter()
            .find(|e| e.tag == tag && !e.target)
            .map(|e| e.value)
    }

    pub(crate) fn entries(&self) -> &[BusEntry] {
        &self.slots
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}
