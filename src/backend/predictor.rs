// Direction prediction for conditional branches plus a bounded return
// address stack for indirect jumps.

const WEAKLY_TAKEN: u8 = 2;
const STRONGLY_TAKEN: u8 = 3;

pub(crate) struct Predictor {
    // 2-bit saturating counters, indexed by pc
    counters: Vec<u8>,
    return_stack: Vec<u32>,
    return_stack_capacity: usize,
}

impl Predictor {
    pub(crate) fn new(table_size: usize, return_stack_capacity: usize) -> Predictor {
        Predictor {
            counters: vec![WEAKLY_TAKEN; table_size],
            return_stack: Vec::with_capacity(return_stack_capacity),
            return_stack_capacity,
        }
    }

    fn index(&self, pc: u32) -> usize {
        ((pc >> 2) as usize) % self.counters.len()
    }

    pub(crate) fn predict_taken(&self, pc: u32) -> bool {
        self.counters[self.index(pc)] >= WEAKLY_TAKEN
    }

    pub(crate) fn update(&mut self, pc: u32, taken: bool) {
        let at = self.index(pc);
        let counter = &mut self.counters[at];
        if taken {
            if *counter < STRONGLY_TAKEN {
                *counter += 1;
            }
        } else if *counter > 0 {
            *counter -= 1;
        }
    }

    // call-like jumps record where the matching indirect jump will land
    pub(crate) fn push_return(&mut self, addr: u32) {
        if self.return_stack.len() == self.return_stack_capacity {
            // bounded: the oldest entry is evicted
            let _ = self.return_stack.remove(0);
        }
        self.return_stack.push(addr);
    }

    // None when empty; the caller falls through to pc + 4
    pub(crate) fn pop_return(&mut self) -> Option<u32> {
        self.return_stack.pop()
    }
}
