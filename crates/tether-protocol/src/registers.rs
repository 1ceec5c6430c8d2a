//! CPU register identifiers, namespaced per architecture.
//!
//! The controller validates a register against the debuggee's architecture
//! before any request is framed, so a mismatched identifier never reaches
//! the wire. Keeping the two families as disjoint enums makes that check a
//! simple comparison instead of a range test over a flat numbering.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Architecture;

/// Identifier for a specific CPU register.
///
/// The wrapper keeps the two architecture families disjoint: an
/// [`X86Register`] can never be mistaken for an [`X86_64Register`] and the
/// owning family is always recoverable via [`Register::architecture`].
///
/// ## Example
///
/// ```rust
/// use tether_protocol::{Architecture, Register, X86_64Register};
///
/// let rip = Register::X86_64(X86_64Register::Rip);
/// assert_eq!(rip.architecture(), Architecture::X86_64);
/// assert_eq!(rip.to_string(), "rip");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register
{
    /// 32-bit x86 register.
    X86(X86Register),
    /// 64-bit x86 register.
    X86_64(X86_64Register),
}

impl Register
{
    /// Architecture family this register belongs to.
    #[must_use]
    pub const fn architecture(self) -> Architecture
    {
        match self {
            Register::X86(_) => Architecture::X86,
            Register::X86_64(_) => Architecture::X86_64,
        }
    }

    /// The program counter register for an architecture.
    ///
    /// `EIP` on x86, `RIP` on x86-64. Used by the controller to implement
    /// `get_pc` on top of the generic register read path.
    #[must_use]
    pub const fn pc(architecture: Architecture) -> Register
    {
        match architecture {
            Architecture::X86 => Register::X86(X86Register::Eip),
            Architecture::X86_64 => Register::X86_64(X86_64Register::Rip),
        }
    }

    /// Lowercase conventional name, e.g. `rip` or `st3`.
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            Register::X86(reg) => reg.name(),
            Register::X86_64(reg) => reg.name(),
        }
    }
}

impl fmt::Display for Register
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// 32-bit x86 registers: segment, general-purpose, control, and the x87
/// floating-point stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum X86Register
{
    /// GS segment register.
    Gs,
    /// FS segment register.
    Fs,
    /// ES segment register.
    Es,
    /// DS segment register.
    Ds,
    /// Destination index.
    Edi,
    /// Source index.
    Esi,
    /// Base pointer.
    Ebp,
    /// Stack pointer.
    Esp,
    /// Base register.
    Ebx,
    /// Data register.
    Edx,
    /// Counter register.
    Ecx,
    /// Accumulator.
    Eax,
    /// CS segment register.
    Cs,
    /// SS segment register.
    Ss,
    /// Instruction pointer.
    Eip,
    /// Flags register.
    Eflags,
    /// x87 floating-point stack register 0.
    St0,
    /// x87 floating-point stack register 1.
    St1,
    /// x87 floating-point stack register 2.
    St2,
    /// x87 floating-point stack register 3.
    St3,
    /// x87 floating-point stack register 4.
    St4,
    /// x87 floating-point stack register 5.
    St5,
    /// x87 floating-point stack register 6.
    St6,
    /// x87 floating-point stack register 7.
    St7,
}

impl X86Register
{
    /// Lowercase conventional name.
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            X86Register::Gs => "gs",
            X86Register::Fs => "fs",
            X86Register::Es => "es",
            X86Register::Ds => "ds",
            X86Register::Edi => "edi",
            X86Register::Esi => "esi",
            X86Register::Ebp => "ebp",
            X86Register::Esp => "esp",
            X86Register::Ebx => "ebx",
            X86Register::Edx => "edx",
            X86Register::Ecx => "ecx",
            X86Register::Eax => "eax",
            X86Register::Cs => "cs",
            X86Register::Ss => "ss",
            X86Register::Eip => "eip",
            X86Register::Eflags => "eflags",
            X86Register::St0 => "st0",
            X86Register::St1 => "st1",
            X86Register::St2 => "st2",
            X86Register::St3 => "st3",
            X86Register::St4 => "st4",
            X86Register::St5 => "st5",
            X86Register::St6 => "st6",
            X86Register::St7 => "st7",
        }
    }
}

impl fmt::Display for X86Register
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// 64-bit x86 registers: general-purpose, control, the x87 floating-point
/// stack, and the XMM vector set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum X86_64Register
{
    /// General-purpose register R8.
    R8,
    /// General-purpose register R9.
    R9,
    /// General-purpose register R10.
    R10,
    /// General-purpose register R11.
    R11,
    /// General-purpose register R12.
    R12,
    /// General-purpose register R13.
    R13,
    /// General-purpose register R14.
    R14,
    /// General-purpose register R15.
    R15,
    /// Destination index.
    Rdi,
    /// Source index.
    Rsi,
    /// Base pointer.
    Rbp,
    /// Base register.
    Rbx,
    /// Data register.
    Rdx,
    /// Accumulator.
    Rax,
    /// Counter register.
    Rcx,
    /// Stack pointer.
    Rsp,
    /// Instruction pointer.
    Rip,
    /// Packed CS/GS/FS segment selectors, as saved by the kernel.
    Csgsfs,
    /// Flags register.
    Rflags,
    /// x87 floating-point stack register 0.
    St0,
    /// x87 floating-point stack register 1.
    St1,
    /// x87 floating-point stack register 2.
    St2,
    /// x87 floating-point stack register 3.
    St3,
    /// x87 floating-point stack register 4.
    St4,
    /// x87 floating-point stack register 5.
    St5,
    /// x87 floating-point stack register 6.
    St6,
    /// x87 floating-point stack register 7.
    St7,
    /// Vector register XMM0.
    Xmm0,
    /// Vector register XMM1.
    Xmm1,
    /// Vector register XMM2.
    Xmm2,
    /// Vector register XMM3.
    Xmm3,
    /// Vector register XMM4.
    Xmm4,
    /// Vector register XMM5.
    Xmm5,
    /// Vector register XMM6.
    Xmm6,
    /// Vector register XMM7.
    Xmm7,
    /// Vector register XMM8.
    Xmm8,
    /// Vector register XMM9.
    Xmm9,
    /// Vector register XMM10.
    Xmm10,
    /// Vector register XMM11.
    Xmm11,
    /// Vector register XMM12.
    Xmm12,
    /// Vector register XMM13.
    Xmm13,
    /// Vector register XMM14.
    Xmm14,
    /// Vector register XMM15.
    Xmm15,
}

impl X86_64Register
{
    /// Lowercase conventional name.
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            X86_64Register::R8 => "r8",
            X86_64Register::R9 => "r9",
            X86_64Register::R10 => "r10",
            X86_64Register::R11 => "r11",
            X86_64Register::R12 => "r12",
            X86_64Register::R13 => "r13",
            X86_64Register::R14 => "r14",
            X86_64Register::R15 => "r15",
            X86_64Register::Rdi => "rdi",
            X86_64Register::Rsi => "rsi",
            X86_64Register::Rbp => "rbp",
            X86_64Register::Rbx => "rbx",
            X86_64Register::Rdx => "rdx",
            X86_64Register::Rax => "rax",
            X86_64Register::Rcx => "rcx",
            X86_64Register::Rsp => "rsp",
            X86_64Register::Rip => "rip",
            X86_64Register::Csgsfs => "csgsfs",
            X86_64Register::Rflags => "rflags",
            X86_64Register::St0 => "st0",
            X86_64Register::St1 => "st1",
            X86_64Register::St2 => "st2",
            X86_64Register::St3 => "st3",
            X86_64Register::St4 => "st4",
            X86_64Register::St5 => "st5",
            X86_64Register::St6 => "st6",
            X86_64Register::St7 => "st7",
            X86_64Register::Xmm0 => "xmm0",
            X86_64Register::Xmm1 => "xmm1",
            X86_64Register::Xmm2 => "xmm2",
            X86_64Register::Xmm3 => "xmm3",
            X86_64Register::Xmm4 => "xmm4",
            X86_64Register::Xmm5 => "xmm5",
            X86_64Register::Xmm6 => "xmm6",
            X86_64Register::Xmm7 => "xmm7",
            X86_64Register::Xmm8 => "xmm8",
            X86_64Register::Xmm9 => "xmm9",
            X86_64Register::Xmm10 => "xmm10",
            X86_64Register::Xmm11 => "xmm11",
            X86_64Register::Xmm12 => "xmm12",
            X86_64Register::Xmm13 => "xmm13",
            X86_64Register::Xmm14 => "xmm14",
            X86_64Register::Xmm15 => "xmm15",
        }
    }
}

impl fmt::Display for X86_64Register
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn register_families_are_disjoint()
    {
        let eip = Register::X86(X86Register::Eip);
        let rip = Register::X86_64(X86_64Register::Rip);
        assert_eq!(eip.architecture(), Architecture::X86);
        assert_eq!(rip.architecture(), Architecture::X86_64);
        assert_ne!(eip, rip);
    }

    #[test]
    fn pc_register_follows_architecture()
    {
        assert_eq!(Register::pc(Architecture::X86), Register::X86(X86Register::Eip));
        assert_eq!(
            Register::pc(Architecture::X86_64),
            Register::X86_64(X86_64Register::Rip)
        );
    }

    #[test]
    fn display_uses_conventional_names()
    {
        assert_eq!(Register::X86(X86Register::Eflags).to_string(), "eflags");
        assert_eq!(Register::X86_64(X86_64Register::Xmm15).to_string(), "xmm15");
        assert_eq!(Register::X86_64(X86_64Register::Csgsfs).to_string(), "csgsfs");
    }

    #[test]
    fn serde_tags_carry_the_family()
    {
        let value = serde_json::to_value(Register::X86_64(X86_64Register::Rax)).unwrap();
        assert_eq!(value, serde_json::json!({ "X86_64": "Rax" }));
        let back: Register = serde_json::from_value(value).unwrap();
        assert_eq!(back, Register::X86_64(X86_64Register::Rax));
    }
}
