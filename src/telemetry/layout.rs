//! Binary layout of the simulator's telemetry segment.
//!
//! The segment starts with a fixed header, followed somewhere by a table of
//! 144-byte variable descriptors, a session-info text block and one or more
//! rotating data buffers. All integers are little-endian.
//!
//! ```text
//! header (112 bytes)
//!   0  version              i32
//!   4  status               i32   bit 0 = connected
//!   8  tickRate             i32
//!  12  sessionInfoUpdate    i32
//!  16  sessionInfoLen       i32
//!  20  sessionInfoOffset    i32
//!  24  numVars              i32
//!  28  varHeaderOffset      i32
//!  32  numBuf               i32
//!  36  bufLen               i32
//!  48  varBuf[4]            { tickCount i32, bufOffset i32, pad [i32; 2] }
//!
//! variable descriptor (144 bytes)
//!   0  type                 i32
//!   4  offset               i32   relative to the data buffer
//!   8  count                i32
//!  12  countAsTime          u8
//!  16  name                 [u8; 32]
//!  48  desc                 [u8; 64]
//! 112  unit                 [u8; 32]
//! ```

use std::collections::HashMap;

use crate::PitlightError;

pub const HEADER_LEN: usize = 112;
pub const VAR_BUF_OFFSET: usize = 48;
pub const VAR_BUF_LEN: usize = 16;
pub const MAX_BUFS: usize = 4;
pub const VAR_HEADER_LEN: usize = 144;
pub const VAR_NAME_OFFSET: usize = 16;
pub const VAR_NAME_LEN: usize = 32;
const VAR_DESC_OFFSET: usize = 48;
const VAR_DESC_LEN: usize = 64;
const VAR_UNIT_OFFSET: usize = 112;
const VAR_UNIT_LEN: usize = 32;
const MAX_VARS: i32 = 4096;

pub const STATUS_CONNECTED: i32 = 0x1;

fn read_i32(bytes: &[u8], offset: usize) -> Result<i32, PitlightError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or(PitlightError::SegmentBoundsError {
            offset,
            len: 4,
            size: bytes.len(),
        })
}

fn slice_at(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], PitlightError> {
    bytes
        .get(offset..offset + len)
        .ok_or(PitlightError::SegmentBoundsError {
            offset,
            len,
            size: bytes.len(),
        })
}

fn invalid_header(reason: String) -> PitlightError {
    PitlightError::InvalidHeader { reason }
}

/// Null-padded ASCII field.
pub(crate) fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarBuf {
    pub tick_count: i32,
    pub buf_offset: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    pub version: i32,
    pub status: i32,
    pub tick_rate: i32,
    pub session_info_update: i32,
    pub session_info_len: i32,
    pub session_info_offset: i32,
    pub num_vars: i32,
    pub var_header_offset: i32,
    pub num_buf: i32,
    pub buf_len: i32,
    pub var_bufs: [VarBuf; MAX_BUFS],
}

impl SegmentHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, PitlightError> {
        let mut var_bufs = [VarBuf::default(); MAX_BUFS];
        for (i, buf) in var_bufs.iter_mut().enumerate() {
            let base = VAR_BUF_OFFSET + i * VAR_BUF_LEN;
            buf.tick_count = read_i32(bytes, base)?;
            buf.buf_offset = read_i32(bytes, base + 4)?;
        }

        Ok(Self {
            version: read_i32(bytes, 0)?,
            status: read_i32(bytes, 4)?,
            tick_rate: read_i32(bytes, 8)?,
            session_info_update: read_i32(bytes, 12)?,
            session_info_len: read_i32(bytes, 16)?,
            session_info_offset: read_i32(bytes, 20)?,
            num_vars: read_i32(bytes, 24)?,
            var_header_offset: read_i32(bytes, 28)?,
            num_buf: read_i32(bytes, 32)?,
            buf_len: read_i32(bytes, 36)?,
            var_bufs,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.status & STATUS_CONNECTED != 0
    }

    /// Rejects headers whose counts or offsets cannot describe a real segment.
    pub fn validate(&self) -> Result<(), PitlightError> {
        if self.num_vars <= 0 || self.num_vars > MAX_VARS {
            return Err(invalid_header(format!(
                "variable count {} out of range",
                self.num_vars
            )));
        }
        if self.var_header_offset < 0 {
            return Err(invalid_header(format!(
                "negative variable header offset {}",
                self.var_header_offset
            )));
        }
        if self.num_buf <= 0 || self.num_buf as usize > MAX_BUFS {
            return Err(invalid_header(format!(
                "buffer count {} out of range",
                self.num_buf
            )));
        }
        if self.buf_len <= 0 {
            return Err(invalid_header(format!(
                "invalid buffer length {}",
                self.buf_len
            )));
        }
        if self.var_bufs[0].buf_offset < 0 {
            return Err(invalid_header(format!(
                "negative data buffer offset {}",
                self.var_bufs[0].buf_offset
            )));
        }
        if self.session_info_len < 0 || self.session_info_offset < 0 {
            return Err(invalid_header(format!(
                "invalid session info block at {} ({} bytes)",
                self.session_info_offset, self.session_info_len
            )));
        }
        Ok(())
    }

    /// Base of the current data buffer. The first descriptor is authoritative.
    pub fn data_offset(&self) -> usize {
        self.var_bufs[0].buf_offset.max(0) as usize
    }

    pub fn var_table_len(&self) -> usize {
        self.num_vars.max(0) as usize * VAR_HEADER_LEN
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarType {
    Char,
    Bool,
    Int,
    Bitfield,
    Float,
    Double,
}

impl VarType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Char),
            1 => Some(Self::Bool),
            2 => Some(Self::Int),
            3 => Some(Self::Bitfield),
            4 => Some(Self::Float),
            5 => Some(Self::Double),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Char => 0,
            Self::Bool => 1,
            Self::Int => 2,
            Self::Bitfield => 3,
            Self::Float => 4,
            Self::Double => 5,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Char | Self::Bool => 1,
            Self::Int | Self::Bitfield | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarDescriptor {
    pub type_code: i32,
    pub offset: i32,
    pub count: i32,
    pub name: String,
    pub description: String,
    pub unit: String,
}

impl VarDescriptor {
    pub fn parse(bytes: &[u8]) -> Result<Self, PitlightError> {
        Ok(Self {
            type_code: read_i32(bytes, 0)?,
            offset: read_i32(bytes, 4)?,
            count: read_i32(bytes, 8)?,
            name: fixed_str(slice_at(bytes, VAR_NAME_OFFSET, VAR_NAME_LEN)?),
            description: fixed_str(slice_at(bytes, VAR_DESC_OFFSET, VAR_DESC_LEN)?),
            unit: fixed_str(slice_at(bytes, VAR_UNIT_OFFSET, VAR_UNIT_LEN)?),
        })
    }

    pub fn var_type(&self) -> Option<VarType> {
        VarType::from_code(self.type_code)
    }
}

/// Parse `num_vars` consecutive descriptors from the variable table.
pub fn parse_var_descriptors(
    table: &[u8],
    num_vars: usize,
) -> Result<Vec<VarDescriptor>, PitlightError> {
    (0..num_vars)
        .map(|i| VarDescriptor::parse(slice_at(table, i * VAR_HEADER_LEN, VAR_HEADER_LEN)?))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VarValue {
    Char(u8),
    Bool(bool),
    Int(i32),
    Bitfield(u32),
    Float(f32),
    Double(f64),
}

impl VarValue {
    /// Decode the first element of a variable at `offset` in the data buffer.
    pub fn decode(var_type: VarType, data: &[u8], offset: usize) -> Result<Self, PitlightError> {
        let raw = slice_at(data, offset, var_type.width())?;
        Ok(match var_type {
            VarType::Char => VarValue::Char(raw[0]),
            VarType::Bool => VarValue::Bool(raw[0] != 0),
            VarType::Int => VarValue::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            VarType::Bitfield => {
                VarValue::Bitfield(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            VarType::Float => {
                VarValue::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            VarType::Double => VarValue::Double(f64::from_le_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ])),
        })
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            VarValue::Char(v) => v as f64,
            VarValue::Bool(v) => v as u8 as f64,
            VarValue::Int(v) => v as f64,
            VarValue::Bitfield(v) => v as f64,
            VarValue::Float(v) => v as f64,
            VarValue::Double(v) => v,
        }
    }

    pub fn as_f32(&self) -> f32 {
        self.as_f64() as f32
    }

    pub fn as_i32(&self) -> i32 {
        match *self {
            VarValue::Char(v) => v as i32,
            VarValue::Bool(v) => v as i32,
            VarValue::Int(v) => v,
            VarValue::Bitfield(v) => v as i32,
            VarValue::Float(v) => v as i32,
            VarValue::Double(v) => v as i32,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match *self {
            VarValue::Bitfield(v) => v,
            VarValue::Int(v) => v as u32,
            other => other.as_i32() as u32,
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            VarValue::Bool(v) => v,
            other => other.as_f64() != 0.,
        }
    }
}

/// Variables the reader looks for in the descriptor table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackedVar {
    SessionFlags,
    SessionNum,
    SessionState,
    SessionTime,
    SessionTimeRemain,
    Lap,
    LapCompleted,
    SessionLapsTotal,
    Speed,
    Rpm,
    Gear,
    Throttle,
    Brake,
    Clutch,
    PlayerCarPosition,
    PlayerCarClassPosition,
    PlayerCarIdx,
    FuelLevel,
    FuelUsePerLap,
    LapLastLapTime,
    LapBestLapTime,
    IsOnTrack,
    IsInGarage,
    OnPitRoad,
}

impl TrackedVar {
    pub const ALL: [TrackedVar; 24] = [
        TrackedVar::SessionFlags,
        TrackedVar::SessionNum,
        TrackedVar::SessionState,
        TrackedVar::SessionTime,
        TrackedVar::SessionTimeRemain,
        TrackedVar::Lap,
        TrackedVar::LapCompleted,
        TrackedVar::SessionLapsTotal,
        TrackedVar::Speed,
        TrackedVar::Rpm,
        TrackedVar::Gear,
        TrackedVar::Throttle,
        TrackedVar::Brake,
        TrackedVar::Clutch,
        TrackedVar::PlayerCarPosition,
        TrackedVar::PlayerCarClassPosition,
        TrackedVar::PlayerCarIdx,
        TrackedVar::FuelLevel,
        TrackedVar::FuelUsePerLap,
        TrackedVar::LapLastLapTime,
        TrackedVar::LapBestLapTime,
        TrackedVar::IsOnTrack,
        TrackedVar::IsInGarage,
        TrackedVar::OnPitRoad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TrackedVar::SessionFlags => "SessionFlags",
            TrackedVar::SessionNum => "SessionNum",
            TrackedVar::SessionState => "SessionState",
            TrackedVar::SessionTime => "SessionTime",
            TrackedVar::SessionTimeRemain => "SessionTimeRemain",
            TrackedVar::Lap => "Lap",
            TrackedVar::LapCompleted => "LapCompleted",
            TrackedVar::SessionLapsTotal => "SessionLapsTotal",
            TrackedVar::Speed => "Speed",
            TrackedVar::Rpm => "RPM",
            TrackedVar::Gear => "Gear",
            TrackedVar::Throttle => "Throttle",
            TrackedVar::Brake => "Brake",
            TrackedVar::Clutch => "Clutch",
            TrackedVar::PlayerCarPosition => "PlayerCarPosition",
            TrackedVar::PlayerCarClassPosition => "PlayerCarClassPosition",
            TrackedVar::PlayerCarIdx => "PlayerCarIdx",
            TrackedVar::FuelLevel => "FuelLevel",
            TrackedVar::FuelUsePerLap => "FuelUsePerLap",
            TrackedVar::LapLastLapTime => "LapLastLapTime",
            TrackedVar::LapBestLapTime => "LapBestLapTime",
            TrackedVar::IsOnTrack => "IsOnTrack",
            TrackedVar::IsInGarage => "IsInGarage",
            TrackedVar::OnPitRoad => "OnPitRoad",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|var| var.name() == name)
    }
}

/// Values of the tracked variables found in one data buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackedValues {
    values: HashMap<TrackedVar, VarValue>,
}

impl TrackedValues {
    /// Scan every descriptor and decode the ones the reader tracks.
    ///
    /// Descriptors with an unknown type code are skipped. A tracked variable
    /// whose offset falls outside the data buffer is an error.
    pub fn decode(descriptors: &[VarDescriptor], data: &[u8]) -> Result<Self, PitlightError> {
        let mut values = HashMap::new();
        for descriptor in descriptors {
            let Some(var) = TrackedVar::from_name(&descriptor.name) else {
                continue;
            };
            let Some(var_type) = descriptor.var_type() else {
                continue;
            };
            if descriptor.offset < 0 {
                return Err(PitlightError::SegmentBoundsError {
                    offset: 0,
                    len: var_type.width(),
                    size: data.len(),
                });
            }
            values.insert(
                var,
                VarValue::decode(var_type, data, descriptor.offset as usize)?,
            );
        }
        Ok(Self { values })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, var: TrackedVar) -> Option<VarValue> {
        self.values.get(&var).copied()
    }

    pub fn f32_or_default(&self, var: TrackedVar) -> f32 {
        self.get(var).map(|v| v.as_f32()).unwrap_or_default()
    }

    pub fn f64_or_default(&self, var: TrackedVar) -> f64 {
        self.get(var).map(|v| v.as_f64()).unwrap_or_default()
    }

    pub fn i32_or_default(&self, var: TrackedVar) -> i32 {
        self.get(var).map(|v| v.as_i32()).unwrap_or_default()
    }

    pub fn u32_or_default(&self, var: TrackedVar) -> u32 {
        self.get(var).map(|v| v.as_u32()).unwrap_or_default()
    }

    pub fn bool_or_default(&self, var: TrackedVar) -> bool {
        self.get(var).map(|v| v.as_bool()).unwrap_or_default()
    }
}

/// Writes segment images in the simulator's layout.
///
/// Lets the reader run against the file-backed segment, the in-memory test
/// segment or a benchmark without a simulator. Places the variable table
/// right after the header, then the session-info block, then a single data
/// buffer.
#[derive(Clone, Debug)]
pub struct SegmentImageBuilder {
    version: i32,
    status: i32,
    tick_rate: i32,
    tick_count: i32,
    session_info_update: i32,
    session_info: String,
    vars: Vec<(String, VarType, Vec<u8>)>,
}

impl Default for SegmentImageBuilder {
    fn default() -> Self {
        Self {
            version: 2,
            status: STATUS_CONNECTED,
            tick_rate: 60,
            tick_count: 1,
            session_info_update: 1,
            session_info: String::new(),
            vars: Vec::new(),
        }
    }
}

impl SegmentImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(mut self, connected: bool) -> Self {
        self.status = if connected { STATUS_CONNECTED } else { 0 };
        self
    }

    pub fn tick_count(mut self, tick_count: i32) -> Self {
        self.tick_count = tick_count;
        self
    }

    pub fn session_info_update(mut self, update: i32) -> Self {
        self.session_info_update = update;
        self
    }

    pub fn session_info(mut self, text: impl Into<String>) -> Self {
        self.session_info = text.into();
        self
    }

    fn var(mut self, name: &str, var_type: VarType, bytes: Vec<u8>) -> Self {
        self.vars.push((name.to_string(), var_type, bytes));
        self
    }

    pub fn var_i32(self, name: &str, value: i32) -> Self {
        self.var(name, VarType::Int, value.to_le_bytes().to_vec())
    }

    pub fn var_bitfield(self, name: &str, value: u32) -> Self {
        self.var(name, VarType::Bitfield, value.to_le_bytes().to_vec())
    }

    pub fn var_f32(self, name: &str, value: f32) -> Self {
        self.var(name, VarType::Float, value.to_le_bytes().to_vec())
    }

    pub fn var_f64(self, name: &str, value: f64) -> Self {
        self.var(name, VarType::Double, value.to_le_bytes().to_vec())
    }

    pub fn var_bool(self, name: &str, value: bool) -> Self {
        self.var(name, VarType::Bool, vec![value as u8])
    }

    pub fn build(&self) -> Vec<u8> {
        let var_table_offset = HEADER_LEN;
        let session_info_offset = var_table_offset + self.vars.len() * VAR_HEADER_LEN;
        // session info is published null terminated
        let session_info_len = self.session_info.len() + 1;
        let data_offset = (session_info_offset + session_info_len).next_multiple_of(16);
        let data_len: usize = self.vars.iter().map(|(_, _, b)| b.len()).sum::<usize>().max(4);

        let mut image = vec![0u8; data_offset + data_len];
        let mut put = |offset: usize, value: i32| {
            image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        };
        put(0, self.version);
        put(4, self.status);
        put(8, self.tick_rate);
        put(12, self.session_info_update);
        put(16, session_info_len as i32);
        put(20, session_info_offset as i32);
        put(24, self.vars.len() as i32);
        put(28, var_table_offset as i32);
        put(32, 1);
        put(36, data_len as i32);
        put(VAR_BUF_OFFSET, self.tick_count);
        put(VAR_BUF_OFFSET + 4, data_offset as i32);

        let mut value_offset = 0usize;
        for (i, (name, var_type, bytes)) in self.vars.iter().enumerate() {
            let base = var_table_offset + i * VAR_HEADER_LEN;
            image[base..base + 4].copy_from_slice(&var_type.code().to_le_bytes());
            image[base + 4..base + 8].copy_from_slice(&(value_offset as i32).to_le_bytes());
            image[base + 8..base + 12].copy_from_slice(&1i32.to_le_bytes());
            let name_bytes = name.as_bytes();
            let name_len = name_bytes.len().min(VAR_NAME_LEN - 1);
            image[base + VAR_NAME_OFFSET..base + VAR_NAME_OFFSET + name_len]
                .copy_from_slice(&name_bytes[..name_len]);

            let at = data_offset + value_offset;
            image[at..at + bytes.len()].copy_from_slice(bytes);
            value_offset += bytes.len();
        }

        image[session_info_offset..session_info_offset + self.session_info.len()]
            .copy_from_slice(self.session_info.as_bytes());

        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields_at_fixed_offsets() {
        let mut bytes = vec![0u8; HEADER_LEN];
        for (i, value) in (1..=10).enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&(value as i32).to_le_bytes());
        }
        bytes[48..52].copy_from_slice(&77i32.to_le_bytes());
        bytes[52..56].copy_from_slice(&4096i32.to_le_bytes());

        let header = SegmentHeader::parse(&bytes).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.status, 2);
        assert_eq!(header.tick_rate, 3);
        assert_eq!(header.session_info_update, 4);
        assert_eq!(header.session_info_len, 5);
        assert_eq!(header.session_info_offset, 6);
        assert_eq!(header.num_vars, 7);
        assert_eq!(header.var_header_offset, 8);
        assert_eq!(header.num_buf, 9);
        assert_eq!(header.buf_len, 10);
        assert_eq!(header.var_bufs[0].tick_count, 77);
        assert_eq!(header.data_offset(), 4096);
        // status 2 does not carry the connected bit
        assert!(!header.is_connected());
    }

    #[test]
    fn test_truncated_header_is_an_error() {
        let bytes = vec![0u8; HEADER_LEN - 1];
        assert!(matches!(
            SegmentHeader::parse(&bytes),
            Err(PitlightError::SegmentBoundsError { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nonsense_counts() {
        let header = SegmentHeader {
            num_vars: 0,
            num_buf: 1,
            buf_len: 16,
            ..Default::default()
        };
        assert!(header.validate().is_err());

        let header = SegmentHeader {
            num_vars: 3,
            num_buf: 5,
            buf_len: 16,
            ..Default::default()
        };
        assert!(header.validate().is_err());

        let header = SegmentHeader {
            num_vars: 3,
            num_buf: 1,
            buf_len: 16,
            ..Default::default()
        };
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_descriptor_name_is_read_from_fixed_offset() {
        let mut bytes = vec![0u8; VAR_HEADER_LEN];
        bytes[0..4].copy_from_slice(&4i32.to_le_bytes());
        bytes[4..8].copy_from_slice(&24i32.to_le_bytes());
        bytes[8..12].copy_from_slice(&1i32.to_le_bytes());
        bytes[16..21].copy_from_slice(b"Speed");
        bytes[48..57].copy_from_slice(b"GPS speed");
        bytes[112..115].copy_from_slice(b"m/s");

        let descriptor = VarDescriptor::parse(&bytes).unwrap();
        assert_eq!(descriptor.name, "Speed");
        assert_eq!(descriptor.description, "GPS speed");
        assert_eq!(descriptor.unit, "m/s");
        assert_eq!(descriptor.offset, 24);
        assert_eq!(descriptor.var_type(), Some(VarType::Float));
    }

    #[test]
    fn test_values_decode_with_type_width() {
        let mut data = vec![0u8; 24];
        data[0] = 1;
        data[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        data[8..12].copy_from_slice(&0x0001_0008u32.to_le_bytes());
        data[12..16].copy_from_slice(&42.5f32.to_le_bytes());
        data[16..24].copy_from_slice(&1234.25f64.to_le_bytes());

        assert_eq!(
            VarValue::decode(VarType::Bool, &data, 0).unwrap(),
            VarValue::Bool(true)
        );
        assert_eq!(
            VarValue::decode(VarType::Int, &data, 4).unwrap(),
            VarValue::Int(-1)
        );
        assert_eq!(
            VarValue::decode(VarType::Bitfield, &data, 8).unwrap(),
            VarValue::Bitfield(0x0001_0008)
        );
        assert_eq!(
            VarValue::decode(VarType::Float, &data, 12).unwrap(),
            VarValue::Float(42.5)
        );
        assert_eq!(
            VarValue::decode(VarType::Double, &data, 16).unwrap(),
            VarValue::Double(1234.25)
        );
        assert!(VarValue::decode(VarType::Double, &data, 20).is_err());
    }

    #[test]
    fn test_tracked_values_skip_unknown_names_and_types() {
        let image = SegmentImageBuilder::new()
            .var_f32("Speed", 55.5)
            .var_i32("Gear", 4)
            .var_f32("SteeringWheelAngle", 0.3)
            .build();
        let header = SegmentHeader::parse(&image).unwrap();
        let table = &image[header.var_header_offset as usize..][..header.var_table_len()];
        let mut descriptors = parse_var_descriptors(table, header.num_vars as usize).unwrap();
        descriptors[1].type_code = 99;

        let data = &image[header.data_offset()..][..header.buf_len as usize];
        let values = TrackedValues::decode(&descriptors, data).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.f32_or_default(TrackedVar::Speed), 55.5);
        assert_eq!(values.get(TrackedVar::Gear), None);
    }

    #[test]
    fn test_builder_round_trips_through_parser() {
        let image = SegmentImageBuilder::new()
            .session_info_update(7)
            .session_info("WeekendInfo:\n TrackDisplayName: Spa\n")
            .var_bitfield("SessionFlags", 0x8)
            .var_f64("SessionTime", 99.5)
            .var_bool("IsOnTrack", true)
            .build();

        let header = SegmentHeader::parse(&image).unwrap();
        header.validate().unwrap();
        assert!(header.is_connected());
        assert_eq!(header.session_info_update, 7);
        assert_eq!(header.num_vars, 3);
        assert_eq!(header.var_header_offset as usize, HEADER_LEN);
        assert_eq!(header.data_offset() % 16, 0);

        let table = &image[header.var_header_offset as usize..][..header.var_table_len()];
        let descriptors = parse_var_descriptors(table, 3).unwrap();
        let data = &image[header.data_offset()..][..header.buf_len as usize];
        let values = TrackedValues::decode(&descriptors, data).unwrap();
        assert_eq!(values.u32_or_default(TrackedVar::SessionFlags), 0x8);
        assert_eq!(values.f64_or_default(TrackedVar::SessionTime), 99.5);
        assert!(values.bool_or_default(TrackedVar::IsOnTrack));
    }

    #[test]
    fn test_tracked_var_names_are_unique() {
        for var in TrackedVar::ALL {
            assert_eq!(TrackedVar::from_name(var.name()), Some(var));
        }
        assert_eq!(TrackedVar::from_name("Rpm"), None);
    }
}
