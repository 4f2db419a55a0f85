use std::fmt;

use thiserror::Error;

pub(crate) type WordType = i32;
pub(crate) type RegisterType = u8;
// Identifies the in-flight reorder buffer entry that will produce a value.
pub(crate) type Tag = u64;

pub(crate) const REG_COUNT: usize = 32;
pub(crate) const INSTR_WIDTH: u32 = 4;

// The reserved program-termination marker: ADDI x10, x0, 255 (0x0ff00513).
pub(crate) const RETURN_REG: RegisterType = 10;
pub(crate) const HALT_IMM: WordType = 255;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Opcode {
    LUI,
    AUIPC,
    JAL,
    JALR,
    BEQ,
    BNE,
    BLT,
    BGE,
    BLTU,
    BGEU,
    LB,
    LH,
    LW,
    LBU,
    LHU,
    SB,
    SH,
    SW,
    ADDI,
    SLTI,
    SLTIU,
    XORI,
    ORI,
    ANDI,
    SLLI,
    SRLI,
    SRAI,
    ADD,
    SUB,
    SLL,
    SLT,
    SLTU,
    XOR,
    SRL,
    SRA,
    OR,
    AND,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Format {
    R,
    I,
    S,
    B,
    U,
    J,
}

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::LUI => "LUI",
        Opcode::AUIPC => "AUIPC",
        Opcode::JAL => "JAL",
        Opcode::JALR => "JALR",
        Opcode::BEQ => "BEQ",
        Opcode::BNE => "BNE",
        Opcode::BLT => "BLT",
        Opcode::BGE => "BGE",
        Opcode::BLTU => "BLTU",
        Opcode::BGEU => "BGEU",
        Opcode::LB => "LB",
        Opcode::LH => "LH",
        Opcode::LW => "LW",
        Opcode::LBU => "LBU",
        Opcode::LHU => "LHU",
        Opcode::SB => "SB",
        Opcode::SH => "SH",
        Opcode::SW => "SW",
        Opcode::ADDI => "ADDI",
        Opcode::SLTI => "SLTI",
        Opcode::SLTIU => "SLTIU",
        Opcode::XORI => "XORI",
        Opcode::ORI => "ORI",
        Opcode::ANDI => "ANDI",
        Opcode::SLLI => "SLLI",
        Opcode::SRLI => "SRLI",
        Opcode::SRAI => "SRAI",
        Opcode::ADD => "ADD",
        Opcode::SUB => "SUB",
        Opcode::SLL => "SLL",
        Opcode::SLT => "SLT",
        Opcode::SLTU => "SLTU",
        Opcode::XOR => "XOR",
        Opcode::SRL => "SRL",
        Opcode::SRA => "SRA",
        Opcode::OR => "OR",
        Opcode::AND => "AND",
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) format: Format,
    pub(crate) rs1: RegisterType,
    pub(crate) rs2: RegisterType,
    pub(crate) rd: RegisterType,
    pub(crate) imm: WordType,
}

impl Instr {
    pub(crate) fn is_load(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::LB | Opcode::LH | Opcode::LW | Opcode::LBU | Opcode::LHU
        )
    }

    pub(crate) fn is_store(&self) -> bool {
        matches!(self.opcode, Opcode::SB | Opcode::SH | Opcode::SW)
    }

    // Only loads and stores go to the memory reservation station.
    pub(crate) fn is_mem(&self) -> bool {
        self.is_load() || self.is_store()
    }

    pub(crate) fn is_branch(&self) -> bool {
        self.format == Format::B
    }

    pub(crate) fn is_halt(&self) -> bool {
        self.opcode == Opcode::ADDI
            && self.rd == RETURN_REG
            && self.rs1 == 0
            && self.imm == HALT_IMM
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", mnemonic(self.opcode))?;
        match self.format {
            Format::R => write!(f, "x{},x{},x{}", self.rd, self.rs1, self.rs2),
            Format::I => write!(f, "x{},x{},{}", self.rd, self.rs1, self.imm),
            Format::S => write!(f, "x{},{}(x{})", self.rs2, self.imm, self.rs1),
            Format::B => write!(f, "x{},x{},{}", self.rs1, self.rs2, self.imm),
            Format::U => write!(f, "x{},{}", self.rd, self.imm),
            Format::J => write!(f, "x{},{}", self.rd, self.imm),
        }
    }
}

#[derive(Debug, Error)]
#[error("unrecognized instruction word {word:#010x}")]
pub(crate) struct DecodeError {
    pub(crate) word: u32,
}

fn sign_extend(src: u32, len: u32) -> WordType {
    let shift = 32 - len;
    ((src << shift) as i32) >> shift
}

fn rd(word: u32) -> RegisterType {
    ((word >> 7) & 0x1f) as RegisterType
}

fn rs1(word: u32) -> RegisterType {
    ((word >> 15) & 0x1f) as RegisterType
}

fn rs2(word: u32) -> RegisterType {
    ((word >> 20) & 0x1f) as RegisterType
}

fn funct3(word: u32) -> u32 {
    (word >> 12) & 0x7
}

fn funct7(word: u32) -> u32 {
    word >> 25
}

fn imm_i(word: u32) -> WordType {
    sign_extend(word >> 20, 12)
}

fn imm_shamt(word: u32) -> WordType {
    ((word >> 20) & 0x1f) as WordType
}

fn imm_s(word: u32) -> WordType {
    sign_extend((word >> 25) << 5 | (word >> 7) & 0x1f, 12)
}

fn imm_b(word: u32) -> WordType {
    let imm = (word >> 31) << 12
        | ((word >> 25) & 0x3f) << 5
        | ((word >> 8) & 0xf) << 1
        | ((word >> 7) & 0x1) << 11;
    sign_extend(imm, 13)
}

fn imm_u(word: u32) -> WordType {
    (word & 0xffff_f000) as WordType
}

fn imm_j(word: u32) -> WordType {
    let imm = (word >> 31) << 20
        | ((word >> 21) & 0x3ff) << 1
        | ((word >> 20) & 0x1) << 11
        | ((word >> 12) & 0xff) << 12;
    sign_extend(imm, 21)
}

// Decode a 32-bit instruction word (assembled in program order, little-endian).
pub(crate) fn decode(word: u32) -> Result<Instr, DecodeError> {
    let err = Err(DecodeError { word });

    let (opcode, format) = match word & 0x7f {
        0b0110111 => (Opcode::LUI, Format::U),
        0b0010111 => (Opcode::AUIPC, Format::U),
        0b1101111 => (Opcode::JAL, Format::J),
        0b1100111 => (Opcode::JALR, Format::I),
        0b0000011 => {
            let opcode = match funct3(word) {
                0b000 => Opcode::LB,
                0b001 => Opcode::LH,
                0b010 => Opcode::LW,
                0b100 => Opcode::LBU,
                0b101 => Opcode::LHU,
                _ => return err,
            };
            (opcode, Format::I)
        }
        0b0100011 => {
            let opcode = match funct3(word) {
                0b000 => Opcode::SB,
                0b001 => Opcode::SH,
                0b010 => Opcode::SW,
                _ => return err,
            };
            (opcode, Format::S)
        }
        0b0010011 => {
            let opcode = match funct3(word) {
                0b000 => Opcode::ADDI,
                0b010 => Opcode::SLTI,
                0b011 => Opcode::SLTIU,
                0b100 => Opcode::XORI,
                0b110 => Opcode::ORI,
                0b111 => Opcode::ANDI,
                0b001 => Opcode::SLLI,
                0b101 => {
                    if funct7(word) == 0 {
                        Opcode::SRLI
                    } else {
                        Opcode::SRAI
                    }
                }
                _ => return err,
            };
            (opcode, Format::I)
        }
        0b0110011 => {
            let opcode = match (funct3(word), funct7(word)) {
                (0b000, 0b0000000) => Opcode::ADD,
                (0b000, 0b0100000) => Opcode::SUB,
                (0b001, 0b0000000) => Opcode::SLL,
                (0b010, 0b0000000) => Opcode::SLT,
                (0b011, 0b0000000) => Opcode::SLTU,
                (0b100, 0b0000000) => Opcode::XOR,
                (0b101, 0b0000000) => Opcode::SRL,
                (0b101, 0b0100000) => Opcode::SRA,
                (0b110, 0b0000000) => Opcode::OR,
                (0b111, 0b0000000) => Opcode::AND,
                _ => return err,
            };
            (opcode, Format::R)
        }
        0b1100011 => {
            let opcode = match funct3(word) {
                0b000 => Opcode::BEQ,
                0b001 => Opcode::BNE,
                0b100 => Opcode::BLT,
                0b101 => Opcode::BGE,
                0b110 => Opcode::BLTU,
                0b111 => Opcode::BGEU,
                _ => return err,
            };
            (opcode, Format::B)
        }
        _ => return err,
    };

    let mut instr = Instr {
        opcode,
        format,
        rs1: 0,
        rs2: 0,
        rd: 0,
        imm: 0,
    };

    match format {
        Format::U => {
            instr.rd = rd(word);
            instr.imm = imm_u(word);
        }
        Format::J => {
            instr.rd = rd(word);
            instr.imm = imm_j(word);
        }
        Format::R => {
            instr.rd = rd(word);
            instr.rs1 = rs1(word);
            instr.rs2 = rs2(word);
        }
        Format::I => {
            instr.rd = rd(word);
            instr.rs1 = rs1(word);
            instr.imm = match opcode {
                // shift immediates carry a 5 bit shamt, not a sign extended value
                Opcode::SLLI | Opcode::SRLI | Opcode::SRAI => imm_shamt(word),
                _ => imm_i(word),
            };
        }
        Format::S => {
            instr.rs1 = rs1(word);
            instr.rs2 = rs2(word);
            instr.imm = imm_s(word);
        }
        Format::B => {
            instr.rs1 = rs1(word);
            instr.rs2 = rs2(word);
            instr.imm = imm_b(word);
        }
    }

    Ok(instr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_halt_marker() {
        let instr = decode(0x0ff00513).unwrap();
        assert_eq!(instr.opcode, Opcode::ADDI);
        assert_eq!(instr.rd, 10);
        assert_eq!(instr.rs1, 0);
        assert_eq!(instr.imm, 255);
        assert!(instr.is_halt());
    }

    #[test]
    fn test_decode_add() {
        // add x3, x1, x2
        let instr = decode(0x002081b3).unwrap();
        assert_eq!(instr.opcode, Opcode::ADD);
        assert_eq!(instr.format, Format::R);
        assert_eq!(instr.rd, 3);
        assert_eq!(instr.rs1, 1);
        assert_eq!(instr.rs2, 2);
    }

    #[test]
    fn test_decode_negative_i_imm() {
        // addi x1, x1, -1
        let instr = decode(0xfff08093).unwrap();
        assert_eq!(instr.opcode, Opcode::ADDI);
        assert_eq!(instr.imm, -1);
    }

    #[test]
    fn test_decode_store() {
        // sw x2, 8(x1)
        let instr = decode(0x0020a423).unwrap();
        assert_eq!(instr.opcode, Opcode::SW);
        assert_eq!(instr.rs1, 1);
        assert_eq!(instr.rs2, 2);
        assert_eq!(instr.imm, 8);
        assert!(instr.is_mem());
        assert!(instr.is_store());
    }

    #[test]
    fn test_decode_backward_branch() {
        // beq x0, x0, -8
        let instr = decode(0xfe000ce3).unwrap();
        assert_eq!(instr.opcode, Opcode::BEQ);
        assert_eq!(instr.imm, -8);
        assert!(instr.is_branch());
    }

    #[test]
    fn test_decode_jal() {
        // jal x1, 16
        let instr = decode(0x010000ef).unwrap();
        assert_eq!(instr.opcode, Opcode::JAL);
        assert_eq!(instr.rd, 1);
        assert_eq!(instr.imm, 16);
    }

    #[test]
    fn test_decode_lui() {
        // lui x5, 0x12345
        let instr = decode(0x123452b7).unwrap();
        assert_eq!(instr.opcode, Opcode::LUI);
        assert_eq!(instr.imm, 0x12345000);
    }

    #[test]
    fn test_decode_srai_shamt() {
        // srai x1, x2, 4
        let instr = decode(0x40415093).unwrap();
        assert_eq!(instr.opcode, Opcode::SRAI);
        assert_eq!(instr.imm, 4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(0xffffffff).is_err());
        assert!(decode(0).is_err());
    }
}
