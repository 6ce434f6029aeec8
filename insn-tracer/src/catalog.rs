//! Register catalog and per-context name resolution

use serde::{Deserialize, Serialize};

use crate::engine::{RegisterAccess, RegisterHandle};

/// x86-64 registers traced when no catalog is configured
pub const DEFAULT_X86_64_REGISTERS: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "rip", "cs", "ss", "ds", "es", "fs", "gs", "fs_base", "gs_base",
    "eflags",
];

/// A register the tracer observes, identified by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub name: String,
}

impl RegisterSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A catalog entry resolved on one execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRegister {
    pub name: String,
    pub handle: RegisterHandle,
}

/// Ordered, immutable set of registers to trace
///
/// Order is output order: lines of one instruction record follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCatalog {
    specs: Vec<RegisterSpec>,
}

impl RegisterCatalog {
    /// Build a catalog from names, keeping their order
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            specs: names.into_iter().map(RegisterSpec::new).collect(),
        }
    }

    /// The x86-64 general purpose, segment and flags registers
    pub fn x86_64() -> Self {
        Self::new(DEFAULT_X86_64_REGISTERS.iter().copied())
    }

    pub fn specs(&self) -> &[RegisterSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Resolve every catalog entry against one context's register facility
    ///
    /// Each name is looked up exactly once, in catalog order. Names the
    /// context cannot resolve are left out of the result.
    pub fn resolve_all(&self, regs: &dyn RegisterAccess) -> Vec<ResolvedRegister> {
        let mut resolved = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            match regs.find_register(&spec.name) {
                Some(handle) => resolved.push(ResolvedRegister {
                    name: spec.name.clone(),
                    handle,
                }),
                None => tracing::debug!("register {} not found, dropping from trace", spec.name),
            }
        }
        resolved
    }
}

impl Default for RegisterCatalog {
    fn default() -> Self {
        Self::x86_64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Resolves names from a fixed table and records every lookup
    struct Lookup {
        known: Vec<&'static str>,
        calls: RefCell<Vec<String>>,
    }

    impl RegisterAccess for Lookup {
        fn find_register(&self, name: &str) -> Option<RegisterHandle> {
            self.calls.borrow_mut().push(name.to_string());
            self.known
                .iter()
                .position(|known| *known == name)
                .map(|idx| RegisterHandle(idx + 100))
        }

        fn read_register(&self, _handle: RegisterHandle, _buf: &mut Vec<u8>) {}
    }

    #[test]
    fn test_resolve_keeps_catalog_order() {
        let catalog = RegisterCatalog::new(["rbx", "rax", "rip"]);
        let regs = Lookup {
            known: vec!["rax", "rbx", "rip"],
            calls: RefCell::new(Vec::new()),
        };

        let resolved = catalog.resolve_all(&regs);
        let names: Vec<&str> = resolved.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["rbx", "rax", "rip"]);
        assert_eq!(resolved[0].handle, RegisterHandle(101));
        assert_eq!(*regs.calls.borrow(), ["rbx", "rax", "rip"]);
    }

    #[test]
    fn test_resolve_drops_missing_registers() {
        let catalog = RegisterCatalog::new(["rax", "xmm0", "rbx"]);
        let regs = Lookup {
            known: vec!["rax", "rbx"],
            calls: RefCell::new(Vec::new()),
        };

        let resolved = catalog.resolve_all(&regs);
        let names: Vec<&str> = resolved.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["rax", "rbx"]);
        // The missing name is still looked up exactly once
        assert_eq!(regs.calls.borrow().len(), 3);
    }

    #[test]
    fn test_default_catalog_is_x86_64() {
        let catalog = RegisterCatalog::default();
        assert_eq!(catalog.len(), 26);
        assert_eq!(catalog.specs()[0].name, "rax");
        assert_eq!(catalog.specs()[25].name, "eflags");
    }
}
