use std::collections::VecDeque;

use log::trace;

use crate::backend::bus::CommonDataBus;
use crate::backend::predictor::Predictor;
use crate::backend::register_file::RegisterFile;
use crate::cpu::PerfCounters;
use crate::instructions::instructions::{
    mnemonic, Format, Instr, Opcode, RegisterType, Tag, WordType, INSTR_WIDTH,
};

#[derive(Clone, Copy, Debug)]
pub(crate) struct RobEntry {
    pub(crate) pc: u32,
    pub(crate) tag: Tag,
    pub(crate) opcode: Opcode,
    // None: no architectural write (stores, branches, the halt marker)
    pub(crate) dest: Option<RegisterType>,
    // branch offset, kept so commit can compute the target from the
    // direction flag the execute phase broadcasts
    pub(crate) imm: WordType,
    pub(crate) ready: bool,
    pub(crate) value: WordType,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CommitOutcome {
    Nothing,
    // exit value of the run
    Halt(u8),
    // corrected fetch target
    Mispredict(u32),
}

// In-order window of in-flight instructions. Entries complete out of order
// via bus broadcasts but retire strictly oldest-first.
pub(crate) struct ReorderBuffer {
    now: VecDeque<RobEntry>,
    next: VecDeque<RobEntry>,
    capacity: usize,
    // tags grow monotonically; the slot is tag % capacity
    next_tag: Tag,
    trace_commit: bool,
}

impl ReorderBuffer {
    pub(crate) fn new(capacity: usize, trace_commit: bool) -> ReorderBuffer {
        ReorderBuffer {
            now: VecDeque::with_capacity(capacity),
            next: VecDeque::with_capacity(capacity),
            capacity,
            next_tag: 0,
            trace_commit,
        }
    }

    pub(crate) fn full(&self) -> bool {
        self.now.len() == self.capacity
    }

    pub(crate) fn size(&self) -> usize {
        self.now.len()
    }

    // Appends an entry and records the destination dependency in the
    // register file, so younger instructions see the new producer.
    pub(crate) fn issue(&mut self, instr: &Instr, pc: u32, reg: &mut RegisterFile) -> Tag {
        let tag = self.next_tag;
        self.next_tag += 1;

        // the halt marker must never collide with a live register use
        let dest = if instr.format == Format::S || instr.format == Format::B || instr.is_halt() {
            None
        } else {
            Some(instr.rd)
        };

        self.next.push_back(RobEntry {
            pc,
            tag,
            opcode: instr.opcode,
            dest,
            imm: instr.imm,
            ready: false,
            value: 0,
        });

        if let Some(rd) = dest {
            reg.set_producer(rd, tag);
        }
        tag
    }

    pub(crate) fn check_bus(&mut self, result_bus: &CommonDataBus) {
        for entry in self.next.iter_mut() {
            if entry.ready {
                continue;
            }
            if let Some(value) = result_bus.try_get(entry.tag) {
                entry.ready = true;
                entry.value = value;
            }
        }
    }

    // Examines only the oldest entry. Stores broadcast their tag so the load
    // store buffer may touch memory; branches and indirect jumps verify the
    // speculatively fetched path against the resolved target.
    pub(crate) fn commit(
        &mut self,
        commit_bus: &mut CommonDataBus,
        reg: &RegisterFile,
        predictor: &mut Predictor,
        perf_counters: &mut PerfCounters,
    ) -> CommitOutcome {
        let head = match self.now.front() {
            Some(head) => *head,
            None => return CommitOutcome::Nothing,
        };
        if !head.ready {
            return CommitOutcome::Nothing;
        }

        if head.opcode == Opcode::ADDI && head.dest.is_none() {
            return CommitOutcome::Halt(reg.ret_value());
        }

        if self.trace_commit {
            trace!(
                "commit pc={:#010x} tag={} {}",
                head.pc,
                head.tag,
                mnemonic(head.opcode)
            );
        }
        perf_counters.retired_cnt += 1;

        match head.opcode {
            Opcode::SB | Opcode::SH | Opcode::SW => {
                // only the tag matters: it releases the queued store
                commit_bus.put_on_bus(head.tag, 0);
                self.next.pop_front();
            }
            Opcode::BEQ | Opcode::BNE | Opcode::BLT | Opcode::BGE | Opcode::BLTU | Opcode::BGEU => {
                // value carries the resolved direction; a taken branch to the
                // next instruction still trains the counter as taken
                let taken = head.value != 0;
                let offset = if taken { head.imm as u32 } else { INSTR_WIDTH };
                let target = head.pc.wrapping_add(offset);
                predictor.update(head.pc, taken);
                let predicted_ok = self.now.get(1).map_or(false, |n| n.pc == target);
                self.next.pop_front();
                if !predicted_ok {
                    perf_counters.branch_misprediction_cnt += 1;
                    return CommitOutcome::Mispredict(target);
                }
                perf_counters.branch_good_predictions_cnt += 1;
            }
            Opcode::JALR => {
                // the link value needs the instruction's own pc, known here
                let link = head.pc.wrapping_add(INSTR_WIDTH) as WordType;
                match head.dest {
                    Some(rd) => commit_bus.put_on_bus_with_dest(head.tag, link, rd),
                    None => commit_bus.put_on_bus(head.tag, link),
                }
                let target = head.value as u32;
                let predicted_ok = self.now.get(1).map_or(false, |n| n.pc == target);
                self.next.pop_front();
                if !predicted_ok {
                    perf_counters.branch_misprediction_cnt += 1;
                    return CommitOutcome::Mispredict(target);
                }
                perf_counters.branch_good_predictions_cnt += 1;
            }
            _ => {
                match head.dest {
                    Some(rd) => commit_bus.put_on_bus_with_dest(head.tag, head.value, rd),
                    None => commit_bus.put_on_bus(head.tag, head.value),
                }
                self.next.pop_front();
            }
        }
        CommitOutcome::Nothing
    }

    pub(crate) fn clear(&mut self) {
        self.next.clear();
    }

    pub(crate) fn flush(&mut self) {
        self.now = self.next.clone();
    }
}
