//! Target ABIs.
//!
//! An [`Abi`] is an architecture bit optionally combined with code
//! generation modifiers (`LLVM`, `THUMB`). A build configuration carries a
//! list of them; each entry has exactly one architecture bit.

use std::fmt;

use bitflags::bitflags;
use ub_diagnostic::{Diagnostic, ErrorCode};

bitflags! {
    /// Architecture plus code generation modifiers.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct Abi: u32 {
        const I386 = 1 << 0;
        const ARMV6 = 1 << 1;
        const ARMV7 = 1 << 2;
        const ARMV7S = 1 << 3;
        const ARM64 = 1 << 4;
        const X86_64 = 1 << 5;
        const THUMB = 1 << 6;
        const LLVM = 1 << 7;
        const ARMV7K = 1 << 8;

        const SIMULATOR_ARCH_MASK = Self::I386.bits() | Self::X86_64.bits();
        const DEVICE_ARCH_MASK = Self::ARMV6.bits()
            | Self::ARMV7.bits()
            | Self::ARMV7S.bits()
            | Self::ARMV7K.bits()
            | Self::ARM64.bits();
        const ARCH_MASK = Self::SIMULATOR_ARCH_MASK.bits() | Self::DEVICE_ARCH_MASK.bits();
        const ARCH_64_MASK = Self::X86_64.bits() | Self::ARM64.bits();
        const ARCH_32_MASK = Self::I386.bits()
            | Self::ARMV6.bits()
            | Self::ARMV7.bits()
            | Self::ARMV7S.bits()
            | Self::ARMV7K.bits();
    }
}

/// Spellings accepted on the command line, in the order they are listed
/// in error messages.
const ACCEPTED: &[(&str, Abi)] = &[
    ("i386", Abi::I386),
    ("x86_64", Abi::X86_64),
    ("armv7", Abi::ARMV7),
    ("armv7+llvm", Abi::ARMV7.union(Abi::LLVM)),
    (
        "armv7+llvm+thumb2",
        Abi::ARMV7.union(Abi::LLVM).union(Abi::THUMB),
    ),
    ("armv7s", Abi::ARMV7S),
    ("armv7s+llvm", Abi::ARMV7S.union(Abi::LLVM)),
    (
        "armv7s+llvm+thumb2",
        Abi::ARMV7S.union(Abi::LLVM).union(Abi::THUMB),
    ),
    ("armv7k", Abi::ARMV7K),
    ("armv7k+llvm", Abi::ARMV7K.union(Abi::LLVM)),
    ("arm64", Abi::ARM64),
    ("arm64+llvm", Abi::ARM64.union(Abi::LLVM)),
];

impl Abi {
    /// Parse a comma-separated ABI list such as `"armv7,arm64+llvm"`.
    ///
    /// A later entry with the same architecture as an earlier one inherits
    /// the earlier entry's modifiers, so `"armv7+llvm,armv7"` yields two
    /// `armv7+LLVM` entries rather than silently dropping LLVM.
    pub fn parse_list(list: &str) -> Result<Vec<Abi>, Diagnostic> {
        let mut result: Vec<Abi> = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Some(&(_, mut value)) = ACCEPTED.iter().find(|(name, _)| *name == entry) else {
                let supported: Vec<&str> = ACCEPTED.iter().map(|(name, _)| *name).collect();
                return Err(Diagnostic::error(ErrorCode::E0015).with_message(format!(
                    "Invalid ABI: {entry}. Supported ABIs are: {}",
                    supported.join(", ")
                )));
            };
            if let Some(prev) = result.iter().find(|prev| prev.arch() == value.arch()) {
                value |= *prev;
            }
            result.push(value);
        }
        Ok(result)
    }

    /// Just the architecture bit.
    #[must_use]
    pub fn arch(self) -> Abi {
        self & Abi::ARCH_MASK
    }

    /// Lower-case architecture name as the native tools spell it.
    pub fn arch_name(self) -> &'static str {
        let arch = self.arch();
        if arch == Abi::I386 {
            "i386"
        } else if arch == Abi::ARMV6 {
            "armv6"
        } else if arch == Abi::ARMV7 {
            "armv7"
        } else if arch == Abi::ARMV7S {
            "armv7s"
        } else if arch == Abi::ARMV7K {
            "armv7k"
        } else if arch == Abi::ARM64 {
            "arm64"
        } else if arch == Abi::X86_64 {
            "x86_64"
        } else {
            "unknown"
        }
    }

    pub fn is_64bit(self) -> bool {
        self.intersects(Abi::ARCH_64_MASK)
    }

    pub fn is_llvm(self) -> bool {
        self.contains(Abi::LLVM)
    }

    pub fn is_thumb(self) -> bool {
        self.contains(Abi::THUMB)
    }

    /// Keep only the entries whose architecture is in `mask`.
    pub fn select(abis: &[Abi], mask: Abi) -> Vec<Abi> {
        abis.iter().copied().filter(|abi| abi.intersects(mask)).collect()
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arch_name())?;
        if self.is_llvm() {
            f.write_str("+LLVM")?;
        }
        if self.is_thumb() {
            f.write_str("+Thumb")?;
        }
        Ok(())
    }
}
