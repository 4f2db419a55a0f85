use log::trace;

use crate::backend::alu;
use crate::backend::bus::CommonDataBus;
use crate::backend::register_file::RegisterFile;
use crate::instructions::instructions::{
    mnemonic, Format, Instr, Opcode, RegisterType, Tag, WordType, INSTR_WIDTH,
};
use crate::memory_subsystem::load_store_buffer::LoadStoreBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operand {
    Value(WordType),
    // waiting on the broadcast of this tag
    Pending(Tag),
}

impl Operand {
    fn is_ready(&self) -> bool {
        matches!(self, Operand::Value(_))
    }

    fn value(&self) -> WordType {
        match self {
            Operand::Value(v) => *v,
            Operand::Pending(tag) => panic!("operand for tag {} still pending", tag),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RsEntry {
    pub(crate) opcode: Opcode,
    pub(crate) op1: Operand,
    pub(crate) op2: Operand,
    pub(crate) imm: WordType,
    pub(crate) tag: Tag,
}

impl RsEntry {
    fn is_ready(&self) -> bool {
        self.op1.is_ready() && self.op2.is_ready()
    }

    fn is_store(&self) -> bool {
        matches!(self.opcode, Opcode::SB | Opcode::SH | Opcode::SW)
    }
}

// Holds issued instructions until their operands arrive over the buses.
// One instance serves the arithmetic pipeline, another the memory pipeline;
// only the dispatch rules differ.
pub(crate) struct ReservationStation {
    now: Vec<RsEntry>,
    next: Vec<RsEntry>,
    capacity: usize,
    trace_execute: bool,
}

impl ReservationStation {
    pub(crate) fn new(capacity: usize, trace_execute: bool) -> ReservationStation {
        ReservationStation {
            now: Vec::with_capacity(capacity),
            next: Vec::with_capacity(capacity),
            capacity,
            trace_execute,
        }
    }

    pub(crate) fn full(&self) -> bool {
        self.next.len() == self.capacity
    }

    pub(crate) fn size(&self) -> usize {
        self.now.len()
    }

    fn read_operand(reg: &RegisterFile, r: RegisterType) -> Operand {
        let entry = reg.get(r);
        match entry.producer {
            Some(tag) => Operand::Pending(tag),
            None => Operand::Value(entry.value),
        }
    }

    pub(crate) fn issue(&mut self, tag: Tag, instr: &Instr, reg: &RegisterFile, pc: u32) {
        // pc-relative operands are folded into the immediate at issue, the
        // only point where the pc of this instruction is at hand
        let imm = match instr.opcode {
            Opcode::AUIPC => instr.imm.wrapping_add(pc as WordType),
            Opcode::JAL => pc.wrapping_add(INSTR_WIDTH) as WordType,
            _ => instr.imm,
        };

        let op1 = match instr.format {
            Format::U | Format::J => Operand::Value(0),
            _ => Self::read_operand(reg, instr.rs1),
        };
        let op2 = match instr.format {
            Format::R | Format::S | Format::B => Self::read_operand(reg, instr.rs2),
            _ => Operand::Value(0),
        };

        self.next.push(RsEntry {
            opcode: instr.opcode,
            op1,
            op2,
            imm,
            tag,
        });
    }

    // Dispatch rule for the arithmetic pipeline: the oldest entry whose
    // operands are ready executes in a single cycle.
    pub(crate) fn execute_arithmetic(&mut self, result_bus: &mut CommonDataBus) {
        let entry = match self.now.iter().find(|e| e.is_ready()) {
            Some(entry) => *entry,
            None => return,
        };
        if self.trace_execute {
            trace!("execute tag={} {}", entry.tag, mnemonic(entry.opcode));
        }
        Self::compute(&entry, result_bus);
        self.next.retain(|e| e.tag != entry.tag);
    }

    fn compute(entry: &RsEntry, result_bus: &mut CommonDataBus) {
        let tag = entry.tag;
        let a = entry.op1.value();
        let b = entry.op2.value();
        let imm = entry.imm;
        match entry.opcode {
            // the immediate already carries the full result for these
            Opcode::LUI | Opcode::AUIPC | Opcode::JAL => result_bus.put_on_bus(tag, imm),
            Opcode::JALR => {
                let target = alu::and(alu::add(a, imm), !1);
                result_bus.put_target_on_bus(tag, target);
            }
            Opcode::BEQ | Opcode::BNE | Opcode::BLT | Opcode::BGE | Opcode::BLTU | Opcode::BGEU => {
                let taken = match entry.opcode {
                    Opcode::BEQ => alu::is_equal(a, b),
                    Opcode::BNE => !alu::is_equal(a, b),
                    Opcode::BLT => alu::is_less_signed(a, b),
                    Opcode::BGE => !alu::is_less_signed(a, b),
                    Opcode::BLTU => alu::is_less_unsigned(a, b),
                    _ => !alu::is_less_unsigned(a, b),
                };
                // the direction only; the reorder buffer holds the offset
                // and computes the target at commit
                result_bus.put_target_on_bus(tag, taken as WordType);
            }
            Opcode::ADDI => result_bus.put_on_bus(tag, alu::add(a, imm)),
            Opcode::SLTI => result_bus.put_on_bus(tag, alu::is_less_signed(a, imm) as WordType),
            Opcode::SLTIU => result_bus.put_on_bus(tag, alu::is_less_unsigned(a, imm) as WordType),
            Opcode::XORI => result_bus.put_on_bus(tag, alu::xor(a, imm)),
            Opcode::ORI => result_bus.put_on_bus(tag, alu::or(a, imm)),
            Opcode::ANDI => result_bus.put_on_bus(tag, alu::and(a, imm)),
            Opcode::SLLI => result_bus.put_on_bus(tag, alu::shift_left(a, imm)),
            Opcode::SRLI => result_bus.put_on_bus(tag, alu::shift_right_logical(a, imm)),
            Opcode::SRAI => result_bus.put_on_bus(tag, alu::shift_right_arithmetic(a, imm)),
            Opcode::ADD => result_bus.put_on_bus(tag, alu::add(a, b)),
            Opcode::SUB => result_bus.put_on_bus(tag, alu::add(alu::add(a, !b), 1)),
            Opcode::SLL => result_bus.put_on_bus(tag, alu::shift_left(a, b)),
            Opcode::SLT => result_bus.put_on_bus(tag, alu::is_less_signed(a, b) as WordType),
            Opcode::SLTU => result_bus.put_on_bus(tag, alu::is_less_unsigned(a, b) as WordType),
            Opcode::XOR => result_bus.put_on_bus(tag, alu::xor(a, b)),
            Opcode::SRL => result_bus.put_on_bus(tag, alu::shift_right_logical(a, b)),
            Opcode::SRA => result_bus.put_on_bus(tag, alu::shift_right_arithmetic(a, b)),
            Opcode::OR => result_bus.put_on_bus(tag, alu::or(a, b)),
            Opcode::AND => result_bus.put_on_bus(tag, alu::and(a, b)),
            Opcode::LB
            | Opcode::LH
            | Opcode::LW
            | Opcode::LBU
            | Opcode::LHU
            | Opcode::SB
            | Opcode::SH
            | Opcode::SW => {
                unreachable!("memory operation routed to the arithmetic pipeline")
            }
        }
    }

    // Dispatch rule for the memory pipeline: entries enter the load store
    // buffer in an order that preserves memory dependencies. A store only
    // leaves from the head; loads may bypass other loads but never a store,
    // since an unresolved store address could alias theirs.
    pub(crate) fn execute_memory(
        &mut self,
        lsb: &mut LoadStoreBuffer,
        result_bus: &mut CommonDataBus,
    ) {
        let mut dispatched: Option<Tag> = None;
        for (index, entry) in self.now.iter().enumerate() {
            if entry.is_store() {
                if index == 0 && entry.is_ready() && lsb.has_space() {
                    let addr = alu::add(entry.op1.value(), entry.imm) as u32;
                    if self.trace_execute {
                        trace!(
                            "dispatch tag={} {} addr={:#010x}",
                            entry.tag,
                            mnemonic(entry.opcode),
                            addr
                        );
                    }
                    lsb.execute(entry.opcode, addr, entry.op2.value(), entry.tag, result_bus);
                    dispatched = Some(entry.tag);
                }
                break;
            }
            if entry.is_ready() && lsb.has_space() {
                let addr = alu::add(entry.op1.value(), entry.imm) as u32;
                if self.trace_execute {
                    trace!(
                        "dispatch tag={} {} addr={:#010x}",
                        entry.tag,
                        mnemonic(entry.opcode),
                        addr
                    );
                }
                lsb.execute(entry.opcode, addr, 0, entry.tag, result_bus);
                dispatched = Some(entry.tag);
                break;
            }
        }
        if let Some(tag) = dispatched {
            self.next.retain(|e| e.tag != tag);
        }
    }

    pub(crate) fn check_bus(&mut self, result_bus: &CommonDataBus, commit_bus: &CommonDataBus) {
        for entry in self.next.iter_mut() {
            for op in [&mut entry.op1, &mut entry.op2] {
                if let Operand::Pending(tag) = *op {
                    // target broadcasts carry a fetch address, not the value
                    // the register will hold; those resolve over the commit bus
                    if let Some(value) = result_bus.try_get_value(tag) {
                        *op = Operand::Value(value);
                    } else if let Some(value) = commit_bus.try_get(tag) {
                        *op = Operand::Value(value);
                    }
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.next.clear();
    }

    pub(crate) fn flush(&mut self) {
        self.now = self.next.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::instructions::decode;

    fn issue_and_flush(rs: &mut ReservationStation, tag: Tag, word: u32, reg: &RegisterFile) {
        let instr = decode(word).unwrap();
        rs.issue(tag, &instr, reg, 0);
        rs.flush();
    }

    #[test]
    fn test_pending_operand_blocks_execution() {
        let mut rs = ReservationStation::new(4, false);
        let mut reg = RegisterFile::new();
        let mut result_bus = CommonDataBus::new(4);
        reg.set_producer(1, 7);
        reg.flush();

        // add x3, x1, x2 waits on the producer of x1
        issue_and_flush(&mut rs, 8, 0x002081b3, &reg);
        rs.execute_arithmetic(&mut result_bus);
        assert_eq!(result_bus.try_get(8), None);
    }

    #[test]
    fn test_wakeup_over_result_bus() {
        let mut rs = ReservationStation::new(4, false);
        let mut reg = RegisterFile::new();
        let mut result_bus = CommonDataBus::new(4);
        let commit_bus = CommonDataBus::new(4);
        reg.set_producer(1, 7);
        reg.flush();

        issue_and_flush(&mut rs, 8, 0x002081b3, &reg);

        result_bus.put_on_bus(7, 40);
        rs.check_bus(&result_bus, &commit_bus);
        rs.flush();
        result_bus.clear();

        rs.execute_arithmetic(&mut result_bus);
        assert_eq!(result_bus.try_get(8), Some(40));
    }

    #[test]
    fn test_target_broadcast_does_not_wake_consumers() {
        let mut rs = ReservationStation::new(4, false);
        let mut reg = RegisterFile::new();
        let mut result_bus = CommonDataBus::new(4);
        let mut commit_bus = CommonDataBus::new(4);
        reg.set_producer(1, 7);
        reg.flush();

        issue_and_flush(&mut rs, 8, 0x002081b3, &reg);

        // a jump target under tag 7 is not the register value
        result_bus.put_target_on_bus(7, 0x200);
        rs.check_bus(&result_bus, &commit_bus);
        rs.flush();
        result_bus.clear();
        rs.execute_arithmetic(&mut result_bus);
        assert_eq!(result_bus.try_get(8), None);

        // the commit broadcast carries the architectural value
        commit_bus.put_on_bus_with_dest(7, 0x104, 1);
        rs.check_bus(&result_bus, &commit_bus);
        rs.flush();
        rs.execute_arithmetic(&mut result_bus);
        assert_eq!(result_bus.try_get(8), Some(0x104));
    }

    #[test]
    fn test_branch_resolves_to_direction_flag() {
        let mut rs = ReservationStation::new(4, false);
        let reg = RegisterFile::new();
        let mut result_bus = CommonDataBus::new(4);

        // beq x0, x0, -8: always taken
        issue_and_flush(&mut rs, 1, 0xfe000ce3, &reg);
        rs.execute_arithmetic(&mut result_bus);
        assert_eq!(result_bus.try_get(1), Some(1));
        assert_eq!(result_bus.try_get_value(1), None);
        result_bus.clear();

        // bne x0, x0, -8: never taken
        rs.flush();
        let instr = decode(0xfe001ce3).unwrap();
        assert_eq!(instr.opcode, Opcode::BNE);
        rs.issue(2, &instr, &reg, 0);
        rs.flush();
        rs.execute_arithmetic(&mut result_bus);
        assert_eq!(result_bus.try_get(2), Some(0));
    }

    #[test]
    fn test_load_never_bypasses_store() {
        let mut rs = ReservationStation::new(4, false);
        let mut reg = RegisterFile::new();
        let mut result_bus = CommonDataBus::new(4);
        let mut lsb = LoadStoreBuffer::new(4, 1);
        // the store address depends on an in-flight producer
        reg.set_producer(1, 5);
        reg.flush();

        // sw x2, 8(x1) then lw x3, 0(x0)
        let store = decode(0x0020a423).unwrap();
        let load = decode(0x00002183).unwrap();
        rs.issue(10, &store, &reg, 0);
        rs.issue(11, &load, &reg, 4);
        rs.flush();

        rs.execute_memory(&mut lsb, &mut result_bus);
        // nothing dispatched: the ready load sits behind an unresolved store
        assert_eq!(rs.size(), 2);
        rs.flush();
        assert_eq!(rs.size(), 2);
    }

    #[test]
    fn test_load_bypasses_waiting_load() {
        let mut rs = ReservationStation::new(4, false);
        let mut reg = RegisterFile::new();
        let mut result_bus = CommonDataBus::new(4);
        let mut lsb = LoadStoreBuffer::new(4, 1);
        reg.set_producer(1, 5);
        reg.flush();

        // lw x3, 0(x1) waits on x1; lw x4, 0(x0) is ready
        let blocked = decode(0x0000a183).unwrap();
        let ready = decode(0x00002203).unwrap();
        rs.issue(10, &blocked, &reg, 0);
        rs.issue(11, &ready, &reg, 4);
        rs.flush();

        rs.execute_memory(&mut lsb, &mut result_bus);
        rs.flush();
        assert_eq!(rs.size(), 1);
    }
}
