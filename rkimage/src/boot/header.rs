//! Boot image header and entry records

use crate::error::{RkImageError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::fmt;
use std::io::{Cursor, Read, Write};

/// "BOOT" read as a little-endian word
pub const BOOT_TAG: u32 = 0x544F_4F42;
pub const BOOT_HEADER_SIZE: usize = 102;
pub const BOOT_ENTRY_SIZE: usize = 57;
pub const MERGER_VERSION: u32 = 0x0103_0000;
/// Wide characters in an entry name, terminator included
pub const ENTRY_NAME_LEN: usize = 20;

const HEADER_RESERVED: usize = 57;

/// Build time stamped into the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl ReleaseTime {
    pub fn now() -> Self {
        Self::from(Local::now().naive_local())
    }
}

impl From<NaiveDateTime> for ReleaseTime {
    fn from(t: NaiveDateTime) -> Self {
        Self {
            year: t.year() as u16,
            month: t.month() as u8,
            day: t.day() as u8,
            hour: t.hour() as u8,
            minute: t.minute() as u8,
            second: t.second() as u8,
        }
    }
}

impl fmt::Display for ReleaseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Location of one class of entry records: `{num, offset, size}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryTable {
    pub num: u8,
    pub offset: u32,
    pub size: u8,
}

impl EntryTable {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.num)?;
        w.write_u32::<LittleEndian>(self.offset)?;
        w.write_u8(self.size)?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            num: r.read_u8()?,
            offset: r.read_u32::<LittleEndian>()?,
            size: r.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootHeader {
    pub tag: u32,
    pub size: u16,
    pub version: u32,
    pub merger_version: u32,
    pub release_time: ReleaseTime,
    pub chip_type: u32,
    pub code471: EntryTable,
    pub code472: EntryTable,
    pub loader: EntryTable,
    pub sign_flag: u8,
    /// 0 when entry data is RC4 processed, 1 for plaintext
    pub rc4_flag: u8,
}

impl BootHeader {
    /// Header for the given entry counts with tables laid out back to back
    pub fn new(version: u32, chip_type: u32, counts: [u8; 3], rc4: bool) -> Self {
        let entry = BOOT_ENTRY_SIZE as u32;
        let code471 = EntryTable {
            num: counts[0],
            offset: BOOT_HEADER_SIZE as u32,
            size: BOOT_ENTRY_SIZE as u8,
        };
        let code472 = EntryTable {
            num: counts[1],
            offset: code471.offset + counts[0] as u32 * entry,
            size: BOOT_ENTRY_SIZE as u8,
        };
        let loader = EntryTable {
            num: counts[2],
            offset: code472.offset + counts[1] as u32 * entry,
            size: BOOT_ENTRY_SIZE as u8,
        };
        Self {
            tag: BOOT_TAG,
            size: BOOT_HEADER_SIZE as u16,
            version,
            merger_version: MERGER_VERSION,
            release_time: ReleaseTime::now(),
            chip_type,
            code471,
            code472,
            loader,
            sign_flag: 0,
            rc4_flag: if rc4 { 0 } else { 1 },
        }
    }

    pub fn rc4_enabled(&self) -> bool {
        self.rc4_flag == 0
    }

    pub fn entry_count(&self) -> usize {
        self.code471.num as usize + self.code472.num as usize + self.loader.num as usize
    }

    /// Offset of the first payload byte
    pub fn data_start(&self) -> u32 {
        (BOOT_HEADER_SIZE + BOOT_ENTRY_SIZE * self.entry_count()) as u32
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.tag)?;
        w.write_u16::<LittleEndian>(self.size)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.merger_version)?;

        let t = &self.release_time;
        w.write_u16::<LittleEndian>(t.year)?;
        w.write_all(&[t.month, t.day, t.hour, t.minute, t.second])?;

        w.write_u32::<LittleEndian>(self.chip_type)?;
        self.code471.write_to(w)?;
        self.code472.write_to(w)?;
        self.loader.write_to(w)?;
        w.write_u8(self.sign_flag)?;
        w.write_u8(self.rc4_flag)?;
        w.write_all(&[0u8; HEADER_RESERVED])?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BOOT_HEADER_SIZE);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_HEADER_SIZE {
            return Err(RkImageError::truncated(
                "boot header",
                BOOT_HEADER_SIZE as u64,
                data.len() as u64,
            ));
        }
        let mut c = Cursor::new(data);

        let tag = c.read_u32::<LittleEndian>()?;
        if tag != BOOT_TAG {
            return Err(RkImageError::invalid_magic(
                BOOT_TAG.to_le_bytes(),
                tag.to_le_bytes(),
            ));
        }
        let size = c.read_u16::<LittleEndian>()?;
        let version = c.read_u32::<LittleEndian>()?;
        let merger_version = c.read_u32::<LittleEndian>()?;
        let release_time = ReleaseTime {
            year: c.read_u16::<LittleEndian>()?,
            month: c.read_u8()?,
            day: c.read_u8()?,
            hour: c.read_u8()?,
            minute: c.read_u8()?,
            second: c.read_u8()?,
        };
        let chip_type = c.read_u32::<LittleEndian>()?;
        let code471 = EntryTable::read_from(&mut c)?;
        let code472 = EntryTable::read_from(&mut c)?;
        let loader = EntryTable::read_from(&mut c)?;
        let sign_flag = c.read_u8()?;
        let rc4_flag = c.read_u8()?;

        Ok(Self {
            tag,
            size,
            version,
            merger_version,
            release_time,
            chip_type,
            code471,
            code472,
            loader,
            sign_flag,
            rc4_flag,
        })
    }
}

/// Entry class, which also selects the cipher chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EntryType {
    DdrInit = 0x01,
    UsbPlug = 0x02,
    Loader = 0x04,
}

impl TryFrom<u32> for EntryType {
    type Error = RkImageError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x01 => Ok(Self::DdrInit),
            0x02 => Ok(Self::UsbPlug),
            0x04 => Ok(Self::Loader),
            other => Err(RkImageError::invalid_image_data(format!(
                "unknown entry type 0x{other:x}"
            ))),
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DdrInit => "471",
            Self::UsbPlug => "472",
            Self::Loader => "loader",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub entry_type: EntryType,
    /// ASCII name, at most 19 characters
    pub name: String,
    pub data_offset: u32,
    pub data_size: u32,
    /// Delay in ms after the ROM runs this entry
    pub data_delay: u16,
}

impl BootEntry {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(BOOT_ENTRY_SIZE as u8)?;
        w.write_u32::<LittleEndian>(self.entry_type as u32)?;

        let mut wide = [0u16; ENTRY_NAME_LEN];
        for (dst, b) in wide
            .iter_mut()
            .zip(self.name.bytes().take(ENTRY_NAME_LEN - 1))
        {
            *dst = b as u16;
        }
        for c in wide {
            w.write_u16::<LittleEndian>(c)?;
        }

        w.write_u32::<LittleEndian>(self.data_offset)?;
        w.write_u32::<LittleEndian>(self.data_size)?;
        w.write_u32::<LittleEndian>(self.data_delay as u32)?;
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_ENTRY_SIZE {
            return Err(RkImageError::truncated(
                "boot entry",
                BOOT_ENTRY_SIZE as u64,
                data.len() as u64,
            ));
        }
        let mut c = Cursor::new(data);
        let size = c.read_u8()?;
        if size as usize != BOOT_ENTRY_SIZE {
            return Err(RkImageError::invalid_image_data(format!(
                "entry record size {size}, expected {BOOT_ENTRY_SIZE}"
            )));
        }
        let entry_type = EntryType::try_from(c.read_u32::<LittleEndian>()?)?;

        let mut name = String::new();
        for _ in 0..ENTRY_NAME_LEN {
            // only the low byte carries the character
            let ch = (c.read_u16::<LittleEndian>()? & 0xff) as u8;
            if ch == 0 {
                break;
            }
            name.push(ch as char);
        }
        c.set_position((1 + 4 + ENTRY_NAME_LEN * 2) as u64);

        let data_offset = c.read_u32::<LittleEndian>()?;
        let data_size = c.read_u32::<LittleEndian>()?;
        let data_delay = c.read_u32::<LittleEndian>()?;

        Ok(Self {
            entry_type,
            name,
            data_offset,
            data_size,
            data_delay: data_delay.min(u16::MAX as u32) as u16,
        })
    }
}
