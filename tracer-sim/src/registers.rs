//! Simulated vCPU register file

use insn_tracer::{RegisterAccess, RegisterHandle};
use rand::Rng;

/// One architectural register of a simulated vCPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRegister {
    pub name: String,
    /// Width in bytes as reported by reads
    pub width: usize,
    pub value: u64,
}

/// Register file of one simulated vCPU
///
/// Handles are indices into the register list, so they are only valid on the
/// register file that produced them.
#[derive(Debug, Clone)]
pub struct SimRegisters {
    regs: Vec<SimRegister>,
}

const X86_64_WIDE: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "rip", "fs_base", "gs_base",
];

const X86_64_NARROW: &[&str] = &["cs", "ss", "ds", "es", "fs", "gs", "eflags"];

/// Initial instruction pointer of every simulated vCPU
pub const ENTRY_POINT: u64 = 0x40_1000;

impl SimRegisters {
    /// An x86-64 register file: 8-byte GPRs and bases, 4-byte selectors and flags
    pub fn x86_64() -> Self {
        let wide = X86_64_WIDE.iter().map(|name| SimRegister {
            name: name.to_string(),
            width: 8,
            value: if *name == "rip" { ENTRY_POINT } else { 0 },
        });
        let narrow = X86_64_NARROW.iter().map(|name| SimRegister {
            name: name.to_string(),
            width: 4,
            value: if *name == "eflags" { 0x2 } else { 0 },
        });
        Self {
            regs: wide.chain(narrow).collect(),
        }
    }

    /// Remove registers so that resolving them fails
    pub fn without(mut self, names: &[&str]) -> Self {
        self.regs.retain(|reg| !names.contains(&reg.name.as_str()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&SimRegister> {
        self.regs.iter().find(|reg| reg.name == name)
    }

    /// Advance the vCPU by one instruction
    ///
    /// Moves `rip` forward by a plausible instruction length and clobbers one
    /// other register with a random value, truncated to its width.
    pub fn step<R: Rng>(&mut self, rng: &mut R) {
        let len = rng.gen_range(1..=15u64);
        if let Some(rip) = self.regs.iter_mut().find(|reg| reg.name == "rip") {
            rip.value = rip.value.wrapping_add(len);
        }

        let candidates: Vec<usize> = (0..self.regs.len())
            .filter(|&idx| self.regs[idx].name != "rip")
            .collect();
        if candidates.is_empty() {
            return;
        }
        let idx = candidates[rng.gen_range(0..candidates.len())];
        let reg = &mut self.regs[idx];
        reg.value = truncate(rng.gen::<u64>(), reg.width);
    }
}

fn truncate(value: u64, width: usize) -> u64 {
    if width >= 8 {
        value
    } else {
        value & ((1u64 << (width * 8)) - 1)
    }
}

impl RegisterAccess for SimRegisters {
    fn find_register(&self, name: &str) -> Option<RegisterHandle> {
        self.regs
            .iter()
            .position(|reg| reg.name == name)
            .map(RegisterHandle)
    }

    fn read_register(&self, handle: RegisterHandle, buf: &mut Vec<u8>) {
        if let Some(reg) = self.regs.get(handle.0) {
            let bytes = reg.value.to_le_bytes();
            buf.extend_from_slice(&bytes[..reg.width.min(8)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_x86_64_widths() {
        let regs = SimRegisters::x86_64();
        let mut buf = Vec::new();

        let rip = regs.find_register("rip").unwrap();
        regs.read_register(rip, &mut buf);
        assert_eq!(buf, ENTRY_POINT.to_le_bytes());

        buf.clear();
        let eflags = regs.find_register("eflags").unwrap();
        regs.read_register(eflags, &mut buf);
        assert_eq!(buf, [0x02, 0, 0, 0]);
    }

    #[test]
    fn test_without_drops_resolution() {
        let regs = SimRegisters::x86_64().without(&["fs_base", "gs_base"]);
        assert!(regs.find_register("fs_base").is_none());
        assert!(regs.find_register("rax").is_some());
    }

    #[test]
    fn test_step_advances_rip_and_respects_width() {
        let mut regs = SimRegisters::x86_64();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            regs.step(&mut rng);
        }
        assert!(regs.get("rip").unwrap().value > ENTRY_POINT);
        for name in X86_64_NARROW {
            assert!(regs.get(name).unwrap().value <= u32::MAX as u64);
        }
    }

    #[test]
    fn test_step_is_deterministic_per_seed() {
        let mut a = SimRegisters::x86_64();
        let mut b = SimRegisters::x86_64();
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            a.step(&mut rng_a);
            b.step(&mut rng_b);
        }
        assert_eq!(a.regs, b.regs);
    }
}
