//! Mach-O CPU type and subtype naming.

/// Mach-O CPU type constants.
pub mod cpu_type {
    pub const VAX: u32 = 1;
    pub const MC680X0: u32 = 6;
    pub const X86: u32 = 7;
    pub const X86_64: u32 = 0x01000007;
    pub const MC98000: u32 = 10;
    pub const HPPA: u32 = 11;
    pub const ARM: u32 = 12;
    pub const ARM64: u32 = 0x0100000C;
    pub const ARM64_32: u32 = 0x0200000C;
    pub const MC88000: u32 = 13;
    pub const SPARC: u32 = 14;
    pub const I860: u32 = 15;
    pub const POWERPC: u32 = 18;
    pub const POWERPC64: u32 = 0x01000012;

    /// CPU_TYPE_64 flag
    pub const ABI64: u32 = 0x01000000;
    /// CPU_TYPE_ARM64_32 ILP32 flag
    pub const ARM64_32_FLAG: u32 = 0x02000000;
}

/// Mach-O ARM subtypes.
pub mod arm_subtype {
    pub const ALL: u32 = 0;
    pub const V4T: u32 = 5;
    pub const V6: u32 = 6;
    pub const V5TEJ: u32 = 7;
    pub const XSCALE: u32 = 8;
    pub const V7: u32 = 9;
    pub const V7F: u32 = 10;
    pub const V7S: u32 = 11;
    pub const V7K: u32 = 12;
    pub const V8: u32 = 13;
    pub const V6M: u32 = 14;
    pub const V7M: u32 = 15;
    pub const V7EM: u32 = 16;
}

/// Mach-O ARM64 subtypes.
pub mod arm64_subtype {
    pub const ALL: u32 = 0;
    pub const V8: u32 = 1;
    /// ARM64E - ARMv8.3+ with pointer authentication
    pub const E: u32 = 2;
}

/// Mach-O x86-64 subtypes.
pub mod x86_64_subtype {
    pub const ALL: u32 = 3;
    pub const H: u32 = 8;
}

/// Mask selecting the capability bits of a CPU subtype.
pub const SUBTYPE_CAPABILITY_MASK: u32 = 0xFF000000;

/// Human-readable description of a CPU type.
pub fn cpu_type_description(cpu_type: u32) -> &'static str {
    match cpu_type {
        cpu_type::VAX => "DEC VAX",
        cpu_type::MC680X0 => "Motorola 68000",
        cpu_type::X86 => "Intel x86",
        cpu_type::X86_64 => "Intel x86-64",
        cpu_type::MC98000 => "Motorola MC98000",
        cpu_type::HPPA => "HP PA-RISC",
        cpu_type::ARM => "ARM",
        cpu_type::ARM64 => "ARM64 / AArch64",
        cpu_type::ARM64_32 => "ARM64_32 (ILP32)",
        cpu_type::MC88000 => "Motorola MC88000",
        cpu_type::SPARC => "SPARC",
        cpu_type::I860 => "Intel i860",
        cpu_type::POWERPC => "PowerPC",
        cpu_type::POWERPC64 => "PowerPC 64-bit",
        _ => "Unknown CPU type",
    }
}

/// Descriptive name of a CPU subtype, when it carries more than the type.
pub fn subtype_description(cpu_type: u32, cpu_subtype: u32) -> Option<&'static str> {
    let subtype = cpu_subtype & !SUBTYPE_CAPABILITY_MASK;
    match (cpu_type, subtype) {
        (cpu_type::X86_64, x86_64_subtype::H) => Some("Haswell"),
        (cpu_type::ARM, arm_subtype::V7F) => Some("ARMv7 Cortex-A9"),
        (cpu_type::ARM, arm_subtype::V7S) => Some("ARMv7S (A6)"),
        (cpu_type::ARM, arm_subtype::V7K) => Some("ARMv7K (Watch)"),
        (cpu_type::ARM, arm_subtype::V6M) => Some("ARMv6-M"),
        (cpu_type::ARM, arm_subtype::V7M) => Some("ARMv7-M"),
        (cpu_type::ARM, arm_subtype::V7EM) => Some("ARMv7E-M"),
        (cpu_type::ARM64, arm64_subtype::E) => Some("ARMv8.3+ (pointer authentication)"),
        (cpu_type::ARM64_32, _) => Some("ILP32"),
        _ => None,
    }
}

/// Short architecture name as used by toolchains (`arm64e`, `x86_64`, ...).
pub fn arch_name(cpu_type: u32, cpu_subtype: u32) -> String {
    let subtype = cpu_subtype & !SUBTYPE_CAPABILITY_MASK;
    let name = match cpu_type {
        cpu_type::X86 => "i386",
        cpu_type::X86_64 if subtype == x86_64_subtype::H => "x86_64h",
        cpu_type::X86_64 => "x86_64",
        cpu_type::ARM => match subtype {
            arm_subtype::V4T => "armv4t",
            arm_subtype::V5TEJ => "armv5",
            arm_subtype::V6 => "armv6",
            arm_subtype::V6M => "armv6m",
            arm_subtype::XSCALE => "xscale",
            arm_subtype::V7 => "armv7",
            arm_subtype::V7F => "armv7f",
            arm_subtype::V7S => "armv7s",
            arm_subtype::V7K => "armv7k",
            arm_subtype::V7M => "armv7m",
            arm_subtype::V7EM => "armv7em",
            arm_subtype::V8 => "armv8",
            _ => "arm",
        },
        cpu_type::ARM64 => match subtype {
            arm64_subtype::E => "arm64e",
            arm64_subtype::V8 => "arm64v8",
            _ => "arm64",
        },
        cpu_type::ARM64_32 => "arm64_32",
        cpu_type::POWERPC => "ppc",
        cpu_type::POWERPC64 => "ppc64",
        cpu_type::MC680X0 => "m68k",
        cpu_type::HPPA => "hppa",
        cpu_type::SPARC => "sparc",
        cpu_type::I860 => "i860",
        _ => return format!("cpu({cpu_type:#x}, {cpu_subtype:#x})"),
    };
    name.to_string()
}
