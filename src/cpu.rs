use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::bus::CommonDataBus;
use crate::backend::predictor::Predictor;
use crate::backend::register_file::RegisterFile;
use crate::backend::reorder_buffer::{CommitOutcome, ReorderBuffer};
use crate::backend::reservation_station::ReservationStation;
use crate::instructions::instructions::{decode, DecodeError, Instr, Opcode, INSTR_WIDTH};
use crate::memory_subsystem::load_store_buffer::LoadStoreBuffer;
use crate::memory_subsystem::memory::Memory;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Trace {
    pub(crate) issue: bool,
    pub(crate) execute: bool,
    pub(crate) commit: bool,
    pub(crate) pipeline_flush: bool,
    pub(crate) cycle: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub(crate) struct CPUConfig {
    // in-flight instruction window
    pub(crate) rob_capacity: usize,
    // per reservation station
    pub(crate) rs_capacity: usize,
    pub(crate) lsb_capacity: usize,
    // broadcast slots per bus per cycle
    pub(crate) cdb_capacity: usize,
    pub(crate) memory_size: usize,
    // cycles a memory access occupies the port
    pub(crate) memory_latency: i32,
    pub(crate) btb_size: usize,
    pub(crate) ras_capacity: usize,
    pub(crate) trace: Trace,
}

impl Default for CPUConfig {
    fn default() -> CPUConfig {
        CPUConfig {
            rob_capacity: 32,
            rs_capacity: 12,
            lsb_capacity: 12,
            cdb_capacity: 4,
            memory_size: 2_000_000,
            memory_latency: 3,
            btb_size: 64,
            ras_capacity: 32,
            trace: Trace::default(),
        }
    }
}

pub(crate) fn load_cpu_config(path: &Path) -> Result<CPUConfig, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    let config: CPUConfig = serde_yaml::from_str(&text)?;
    Ok(config)
}

#[derive(Debug, Error)]
pub(crate) enum ExecutionError {
    #[error("illegal instruction at pc {pc:#010x}: {source}")]
    IllegalInstruction { pc: u32, source: DecodeError },
    #[error("memory access at {addr:#010x} of {len} byte(s) is out of bounds")]
    OutOfBounds { addr: u32, len: u32 },
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PerfCounters {
    pub(crate) cycle_cnt: u64,
    pub(crate) issue_cnt: u64,
    pub(crate) retired_cnt: u64,
    pub(crate) pipeline_flushes: u64,
    pub(crate) branch_good_predictions_cnt: u64,
    pub(crate) branch_misprediction_cnt: u64,
}

impl PerfCounters {
    pub(crate) fn new() -> PerfCounters {
        PerfCounters::default()
    }
}

impl Display for PerfCounters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ipc = if self.cycle_cnt == 0 {
            0.0
        } else {
            self.retired_cnt as f64 / self.cycle_cnt as f64
        };
        write!(
            f,
            "cycles={} issued={} retired={} ipc={:.2} flushes={} branch_hits={} branch_misses={}",
            self.cycle_cnt,
            self.issue_cnt,
            self.retired_cnt,
            ipc,
            self.pipeline_flushes,
            self.branch_good_predictions_cnt,
            self.branch_misprediction_cnt
        )
    }
}

pub(crate) struct CPU {
    memory: Memory,
    reg: RegisterFile,
    rob: ReorderBuffer,
    arith_station: ReservationStation,
    mem_station: ReservationStation,
    lsb: LoadStoreBuffer,
    predictor: Predictor,
    result_bus: CommonDataBus,
    commit_bus: CommonDataBus,
    pc: u32,
    trace: Trace,
    pub(crate) perf_counters: PerfCounters,
}

impl CPU {
    pub(crate) fn new(config: &CPUConfig) -> CPU {
        CPU {
            memory: Memory::new(config.memory_size),
            reg: RegisterFile::new(),
            rob: ReorderBuffer::new(config.rob_capacity, config.trace.commit),
            arith_station: ReservationStation::new(config.rs_capacity, config.trace.execute),
            mem_station: ReservationStation::new(config.rs_capacity, config.trace.execute),
            lsb: LoadStoreBuffer::with_trace(
                config.lsb_capacity,
                config.memory_latency,
                config.trace.execute,
            ),
            predictor: Predictor::new(config.btb_size, config.ras_capacity),
            result_bus: CommonDataBus::new(config.cdb_capacity),
            commit_bus: CommonDataBus::new(config.cdb_capacity),
            pc: 0,
            trace: config.trace.clone(),
            perf_counters: PerfCounters::new(),
        }
    }

    pub(crate) fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub(crate) fn init(&mut self, entry: u32) {
        self.pc = entry;
    }

    #[cfg(test)]
    pub(crate) fn pc(&self) -> u32 {
        self.pc
    }

    #[cfg(test)]
    pub(crate) fn reg_value(
        &self,
        reg: crate::instructions::instructions::RegisterType,
    ) -> crate::instructions::instructions::WordType {
        self.reg.get(reg).value
    }

    // Runs until the halt marker retires. The exit value is the low byte of
    // the return value register at that point.
    pub(crate) fn run(&mut self) -> Result<u8, ExecutionError> {
        loop {
            if let Some(value) = self.cycle()? {
                return Ok(value);
            }
        }
    }

    pub(crate) fn cycle(&mut self) -> Result<Option<u8>, ExecutionError> {
        if self.trace.cycle {
            debug!(
                "cycle {} pc={:#010x} rob={} lsb={}",
                self.perf_counters.cycle_cnt,
                self.pc,
                self.rob.size(),
                self.lsb.size()
            );
        }
        self.try_issue()?;
        self.arith_station.execute_arithmetic(&mut self.result_bus);
        self.mem_station
            .execute_memory(&mut self.lsb, &mut self.result_bus);
        self.lsb
            .try_load_store(&mut self.memory, &mut self.result_bus)?;
        let outcome = self.rob.commit(
            &mut self.commit_bus,
            &self.reg,
            &mut self.predictor,
            &mut self.perf_counters,
        );
        self.perf_counters.cycle_cnt += 1;
        match outcome {
            CommitOutcome::Halt(value) => return Ok(Some(value)),
            CommitOutcome::Mispredict(target) => self.sync(Some(target)),
            CommitOutcome::Nothing => self.sync(None),
        }
        Ok(None)
    }

    // Issue is the only phase that consults the fetch path. A fetch or
    // decode problem on a speculative path is not an error; the pending
    // redirect will steer fetch away from it. Only when nothing is in
    // flight can the bad path be architectural.
    fn try_issue(&mut self) -> Result<(), ExecutionError> {
        if self.rob.full() {
            return Ok(());
        }
        let word = match self.memory.fetch_word(self.pc) {
            Ok(word) => word,
            Err(e) => {
                return if self.rob.size() == 0 { Err(e) } else { Ok(()) };
            }
        };
        let instr = match decode(word) {
            Ok(instr) => instr,
            Err(source) => {
                return if self.rob.size() == 0 {
                    Err(ExecutionError::IllegalInstruction {
                        pc: self.pc,
                        source,
                    })
                } else {
                    Ok(())
                };
            }
        };

        let station_full = if instr.is_mem() {
            self.mem_station.full()
        } else {
            self.arith_station.full()
        };
        if station_full {
            return Ok(());
        }

        if self.trace.issue {
            debug!("issue pc={:#010x} {}", self.pc, instr);
        }
        let tag = self.rob.issue(&instr, self.pc, &mut self.reg);
        if instr.is_mem() {
            self.mem_station.issue(tag, &instr, &self.reg, self.pc);
        } else {
            self.arith_station.issue(tag, &instr, &self.reg, self.pc);
        }
        self.perf_counters.issue_cnt += 1;
        self.pc = self.next_pc(&instr);
        Ok(())
    }

    fn next_pc(&mut self, instr: &Instr) -> u32 {
        let fall_through = self.pc.wrapping_add(INSTR_WIDTH);
        match instr.opcode {
            Opcode::JAL => {
                // rd != 0 marks a call; record where the return will land
                if instr.rd != 0 {
                    self.predictor.push_return(fall_through);
                }
                self.pc.wrapping_add(instr.imm as u32)
            }
            Opcode::JALR => {
                let predicted = self.predictor.pop_return().unwrap_or(fall_through);
                if instr.rd != 0 {
                    self.predictor.push_return(fall_through);
                }
                predicted
            }
            _ if instr.is_branch() => {
                if self.predictor.predict_taken(self.pc) {
                    self.pc.wrapping_add(instr.imm as u32)
                } else {
                    fall_through
                }
            }
            _ => fall_through,
        }
    }

    // End of cycle: broadcasts propagate to every consumer, then all double
    // buffered state publishes. A redirect discards the speculative `next`
    // state first, so only the committed path survives.
    fn sync(&mut self, redirect: Option<u32>) {
        self.arith_station
            .check_bus(&self.result_bus, &self.commit_bus);
        self.mem_station
            .check_bus(&self.result_bus, &self.commit_bus);
        self.rob.check_bus(&self.result_bus);
        self.reg.check_bus(&self.commit_bus);
        self.lsb.check_bus(&self.commit_bus);

        if let Some(target) = redirect {
            if self.trace.pipeline_flush {
                debug!("pipeline flush, fetch redirected to {:#010x}", target);
            }
            self.perf_counters.pipeline_flushes += 1;
            self.rob.clear();
            self.arith_station.clear();
            self.mem_station.clear();
            self.lsb.clear();
            self.reg.clear_producers();
            self.pc = target;
        }

        self.reg.flush();
        self.rob.flush();
        self.arith_station.flush();
        self.mem_station.flush();
        self.lsb.flush();
        self.result_bus.clear();
        self.commit_bus.clear();
    }
}
