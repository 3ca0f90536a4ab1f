// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bootloader hand-over structures and their validation
//! OWNERS: @kernel-team
//! PUBLIC API: RawBootInfo, BootInfo, MemoryKind, BootError, cmdline
//! DEPENDS_ON: hik_abi::{BOOT_MAGIC, BOOT_VERSION, BootFlags}, static_assertions
//! INVARIANTS: Raw structures are plain `#[repr(C)]` with checked layout; nothing past
//!             validation carries unchecked firmware data

pub mod cmdline;

use static_assertions::const_assert_eq;

pub use hik_abi::{BootFlags, BOOT_MAGIC, BOOT_VERSION};

/// Firmware discovery pointers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareInfo {
    /// ACPI RSDP physical address, 0 if absent.
    pub acpi_rsdp: u64,
    /// ACPI XSDT physical address, 0 if absent.
    pub acpi_xsdt: u64,
    /// Firmware system table, 0 if absent.
    pub system_table: u64,
}

/// Where the bootloader placed the kernel image.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelImage {
    /// Image base address.
    pub base: u64,
    /// Image size in bytes.
    pub size: u64,
    /// Entry point address.
    pub entry_point: u64,
}

/// One preloaded module.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawModule {
    /// Module base address.
    pub base: u64,
    /// Module size in bytes.
    pub size: u64,
    /// NUL-padded module name.
    pub name: [u8; 64],
}

impl Default for RawModule {
    fn default() -> Self {
        Self { base: 0, size: 0, name: [0; 64] }
    }
}

/// Machine summary from the bootloader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemInfo {
    /// Logical CPU count.
    pub cpu_count: u32,
    /// Installed memory in MiB.
    pub memory_size_mb: u32,
    /// Architecture tag.
    pub architecture: u32,
    /// Platform tag.
    pub platform_type: u32,
}

/// Framebuffer description.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoInfo {
    /// Framebuffer physical address.
    pub framebuffer: u64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per scanline.
    pub pitch: u32,
    /// Bits per pixel.
    pub bpp: u32,
}

/// Early-debug channel description.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugInfo {
    /// Serial port base, 0 if absent.
    pub serial_port: u64,
    /// Firmware log buffer address, 0 if absent.
    pub log_buffer: u64,
    /// Firmware log buffer size.
    pub log_size: u64,
}

/// One memory-map entry as handed over by the bootloader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMemoryRegion {
    /// First byte of the range.
    pub base: u64,
    /// Range length in bytes.
    pub length: u64,
    /// Raw type tag (see [`MemoryKind`]).
    pub kind: u32,
    /// Firmware-specific flags.
    pub flags: u32,
}

/// Decoded memory-map entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Free RAM the PMM may own.
    Usable,
    /// Firmware-reserved.
    Reserved,
    /// ACPI reclaimable tables.
    Acpi,
    /// ACPI non-volatile storage.
    Nvs,
    /// Defective or unaddressable.
    Unusable,
    /// Bootloader working memory.
    Bootloader,
    /// The kernel image itself.
    Kernel,
    /// A preloaded module.
    Module,
}

impl MemoryKind {
    /// Decodes the raw tag.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Usable,
            1 => Self::Reserved,
            2 => Self::Acpi,
            3 => Self::Nvs,
            4 => Self::Unusable,
            5 => Self::Bootloader,
            6 => Self::Kernel,
            7 => Self::Module,
            _ => return None,
        })
    }
}

/// The full hand-over block at kernel entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawBootInfo {
    /// Must equal [`BOOT_MAGIC`].
    pub magic: u32,
    /// Must equal [`BOOT_VERSION`].
    pub version: u32,
    /// Raw [`BootFlags`] bits.
    pub flags: u32,
    /// Padding.
    pub _reserved0: u32,
    /// Physical pointer to the memory-map array.
    pub memory_map: u64,
    /// Number of memory-map entries.
    pub memory_map_entries: u32,
    /// Padding.
    pub _reserved1: u32,
    /// Firmware pointers.
    pub firmware: FirmwareInfo,
    /// Kernel image placement.
    pub kernel: KernelImage,
    /// NUL-terminated command line.
    pub cmdline: [u8; 256],
    /// Number of valid entries in `modules`.
    pub module_count: u32,
    /// Padding.
    pub _reserved2: u32,
    /// Preloaded modules.
    pub modules: [RawModule; 16],
    /// Machine summary.
    pub system: SystemInfo,
    /// Physical pointer to the platform config blob (YAML).
    pub config_blob: u64,
    /// Config blob size in bytes.
    pub config_size: u64,
    /// Framebuffer description.
    pub video: VideoInfo,
    /// Early-debug channel.
    pub debug: DebugInfo,
}

// The hand-over layout is part of the bootloader contract; keep the compiler
// honest about the offsets that matter.
const_assert_eq!(core::mem::size_of::<RawMemoryRegion>(), 24);
const_assert_eq!(core::mem::size_of::<RawModule>(), 80);
const_assert_eq!(core::mem::size_of::<FirmwareInfo>(), 24);
const_assert_eq!(core::mem::size_of::<KernelImage>(), 24);

/// Why the hand-over block was rejected.
#[must_use = "boot errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// Magic is not "HIK!".
    BadMagic,
    /// Version is newer than this kernel understands.
    UnsupportedVersion,
    /// The memory map is empty.
    EmptyMemoryMap,
    /// A memory-map entry wraps or carries an unknown type.
    MalformedRegion,
    /// More modules than the fixed bound.
    TooManyModules,
    /// The command line is not NUL-terminated UTF-8.
    BadCmdline,
}

/// Validated view over the hand-over block. Integrity failures here are
/// terminal; the caller halts rather than guessing at firmware intent.
pub struct BootInfo<'a> {
    /// Decoded flag bits.
    pub flags: BootFlags,
    /// Borrowed memory map.
    pub memory_map: &'a [RawMemoryRegion],
    /// Borrowed command line.
    pub cmdline: &'a str,
    /// Firmware pointers.
    pub firmware: FirmwareInfo,
    /// Kernel image placement.
    pub kernel: KernelImage,
    /// Valid preloaded modules.
    pub modules: &'a [RawModule],
    /// Machine summary.
    pub system: SystemInfo,
    /// Framebuffer description.
    pub video: VideoInfo,
    /// Early-debug channel.
    pub debug: DebugInfo,
}

impl<'a> BootInfo<'a> {
    /// Validates the raw block against the memory map the pointer fields
    /// reference. The map slice is passed in explicitly so host tests never
    /// follow raw physical pointers.
    pub fn validate(
        raw: &'a RawBootInfo,
        memory_map: &'a [RawMemoryRegion],
    ) -> Result<Self, BootError> {
        if raw.magic != BOOT_MAGIC {
            return Err(BootError::BadMagic);
        }
        if raw.version != BOOT_VERSION {
            return Err(BootError::UnsupportedVersion);
        }
        if memory_map.is_empty() || raw.memory_map_entries as usize != memory_map.len() {
            return Err(BootError::EmptyMemoryMap);
        }
        for region in memory_map {
            if region.length == 0 || region.base.checked_add(region.length).is_none() {
                return Err(BootError::MalformedRegion);
            }
            if MemoryKind::from_raw(region.kind).is_none() {
                return Err(BootError::MalformedRegion);
            }
        }
        if raw.module_count as usize > raw.modules.len() {
            return Err(BootError::TooManyModules);
        }
        let nul = raw
            .cmdline
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(BootError::BadCmdline)?;
        let cmdline =
            core::str::from_utf8(&raw.cmdline[..nul]).map_err(|_| BootError::BadCmdline)?;

        Ok(Self {
            flags: BootFlags::from_bits_truncate(raw.flags),
            memory_map,
            cmdline,
            firmware: raw.firmware,
            kernel: raw.kernel,
            modules: &raw.modules[..raw.module_count as usize],
            system: raw.system,
            video: raw.video,
            debug: raw.debug,
        })
    }

    /// Iterates over the usable RAM entries.
    pub fn usable_regions(&self) -> impl Iterator<Item = &RawMemoryRegion> {
        self.memory_map
            .iter()
            .filter(|region| MemoryKind::from_raw(region.kind) == Some(MemoryKind::Usable))
    }
}

/// Fills a raw block with inert defaults; the bootloader overwrites what it
/// knows. Also the base for host-test fixtures.
pub fn empty_raw() -> RawBootInfo {
    RawBootInfo {
        magic: BOOT_MAGIC,
        version: BOOT_VERSION,
        flags: 0,
        _reserved0: 0,
        memory_map: 0,
        memory_map_entries: 0,
        _reserved1: 0,
        firmware: FirmwareInfo::default(),
        kernel: KernelImage::default(),
        cmdline: [0; 256],
        module_count: 0,
        _reserved2: 0,
        modules: [RawModule::default(); 16],
        system: SystemInfo::default(),
        config_blob: 0,
        config_size: 0,
        video: VideoInfo::default(),
        debug: DebugInfo::default(),
    }
}
