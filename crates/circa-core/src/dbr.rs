//! DBR data types and payload packing.
//!
//! Every data-bearing CA payload is one of the classic `db_access` layouts:
//! an optional metadata prefix (status/severity, timestamp, display and
//! control information, depending on family) followed by a packed array of
//! values. Layouts are fixed-offset and big-endian, including the historical
//! RISC alignment pads; nothing here is self-describing.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{CommandError, DecodeError};

/// Fixed width of a DBR string cell (terminating NUL included).
pub const MAX_STRING_SIZE: usize = 40;

/// Fixed width of an engineering-units cell.
pub const MAX_UNITS_SIZE: usize = 8;

/// Fixed width of one enum-state string cell.
pub const MAX_ENUM_STRING_SIZE: usize = 26;

/// Number of enum-state cells carried by GR_ENUM/CTRL_ENUM.
pub const MAX_ENUM_STATES: usize = 16;

/// The metadata family of a DBR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbrFamily {
    /// Value only.
    Base,
    /// Alarm status and severity.
    Sts,
    /// Status, severity, and timestamp.
    Time,
    /// Status, severity, and graphical (display) information.
    Gr,
    /// Graphical information plus control limits.
    Ctrl,
}

/// The native element type of a DBR type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasicType {
    String,
    Int,
    Float,
    Enum,
    Char,
    Long,
    Double,
}

impl BasicType {
    /// Width of one packed element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            BasicType::String => MAX_STRING_SIZE,
            BasicType::Int => 2,
            BasicType::Float => 4,
            BasicType::Enum => 2,
            BasicType::Char => 1,
            BasicType::Long => 4,
            BasicType::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BasicType::String => "STRING",
            BasicType::Int => "INT",
            BasicType::Float => "FLOAT",
            BasicType::Enum => "ENUM",
            BasicType::Char => "CHAR",
            BasicType::Long => "LONG",
            BasicType::Double => "DOUBLE",
        }
    }
}

/// A DBR type code as carried in the `data_type` header field.
///
/// Codes are laid out in blocks of seven: base types 0–6, then the STS,
/// TIME, GR, and CTRL families repeating the same seven element types.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbrType {
    String = 0,
    Int = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
    StsString = 7,
    StsInt = 8,
    StsFloat = 9,
    StsEnum = 10,
    StsChar = 11,
    StsLong = 12,
    StsDouble = 13,
    TimeString = 14,
    TimeInt = 15,
    TimeFloat = 16,
    TimeEnum = 17,
    TimeChar = 18,
    TimeLong = 19,
    TimeDouble = 20,
    GrString = 21,
    GrInt = 22,
    GrFloat = 23,
    GrEnum = 24,
    GrChar = 25,
    GrLong = 26,
    GrDouble = 27,
    CtrlString = 28,
    CtrlInt = 29,
    CtrlFloat = 30,
    CtrlEnum = 31,
    CtrlChar = 32,
    CtrlLong = 33,
    CtrlDouble = 34,
}

/// Error when converting from an unknown DBR type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownDbrType(pub u16);

impl fmt::Display for UnknownDbrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown DBR type code: {}", self.0)
    }
}

impl std::error::Error for UnknownDbrType {}

impl DbrType {
    /// Convert from the wire value. Returns `None` for codes outside the
    /// base/STS/TIME/GR/CTRL families.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            0 => DbrType::String,
            1 => DbrType::Int,
            2 => DbrType::Float,
            3 => DbrType::Enum,
            4 => DbrType::Char,
            5 => DbrType::Long,
            6 => DbrType::Double,
            7 => DbrType::StsString,
            8 => DbrType::StsInt,
            9 => DbrType::StsFloat,
            10 => DbrType::StsEnum,
            11 => DbrType::StsChar,
            12 => DbrType::StsLong,
            13 => DbrType::StsDouble,
            14 => DbrType::TimeString,
            15 => DbrType::TimeInt,
            16 => DbrType::TimeFloat,
            17 => DbrType::TimeEnum,
            18 => DbrType::TimeChar,
            19 => DbrType::TimeLong,
            20 => DbrType::TimeDouble,
            21 => DbrType::GrString,
            22 => DbrType::GrInt,
            23 => DbrType::GrFloat,
            24 => DbrType::GrEnum,
            25 => DbrType::GrChar,
            26 => DbrType::GrLong,
            27 => DbrType::GrDouble,
            28 => DbrType::CtrlString,
            29 => DbrType::CtrlInt,
            30 => DbrType::CtrlFloat,
            31 => DbrType::CtrlEnum,
            32 => DbrType::CtrlChar,
            33 => DbrType::CtrlLong,
            34 => DbrType::CtrlDouble,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn family(self) -> DbrFamily {
        match self.as_u16() / 7 {
            0 => DbrFamily::Base,
            1 => DbrFamily::Sts,
            2 => DbrFamily::Time,
            3 => DbrFamily::Gr,
            _ => DbrFamily::Ctrl,
        }
    }

    pub fn basic_type(self) -> BasicType {
        match self.as_u16() % 7 {
            0 => BasicType::String,
            1 => BasicType::Int,
            2 => BasicType::Float,
            3 => BasicType::Enum,
            4 => BasicType::Char,
            5 => BasicType::Long,
            _ => BasicType::Double,
        }
    }

    /// Width of one value element.
    pub fn element_size(self) -> usize {
        self.basic_type().element_size()
    }

    /// Byte offset of the first value element, i.e. the size of the metadata
    /// prefix including alignment pads.
    pub fn metadata_size(self) -> usize {
        use BasicType::*;
        use DbrFamily::*;
        match (self.family(), self.basic_type()) {
            (Base, _) => 0,
            // status + severity
            (Sts, Char) => 4 + 1,
            (Sts, Double) => 4 + 4,
            (Sts, _) => 4,
            // status + severity + (secs, nanos)
            (Time, Int) | (Time, Enum) => 12 + 2,
            (Time, Char) => 12 + 3,
            (Time, Double) => 12 + 4,
            (Time, _) => 12,
            // GR_STRING and CTRL_STRING reuse the STS_STRING layout.
            (Gr, String) | (Ctrl, String) => 4,
            (Gr, Enum) | (Ctrl, Enum) => 4 + 2 + MAX_ENUM_STATES * MAX_ENUM_STRING_SIZE,
            (Gr, Int) => 4 + MAX_UNITS_SIZE + 6 * 2,
            (Gr, Float) => 4 + 2 + 2 + MAX_UNITS_SIZE + 6 * 4,
            (Gr, Char) => 4 + MAX_UNITS_SIZE + 6 + 1,
            (Gr, Long) => 4 + MAX_UNITS_SIZE + 6 * 4,
            (Gr, Double) => 4 + 2 + 2 + MAX_UNITS_SIZE + 6 * 8,
            (Ctrl, Int) => 4 + MAX_UNITS_SIZE + 8 * 2,
            (Ctrl, Float) => 4 + 2 + 2 + MAX_UNITS_SIZE + 8 * 4,
            (Ctrl, Char) => 4 + MAX_UNITS_SIZE + 8 + 1,
            (Ctrl, Long) => 4 + MAX_UNITS_SIZE + 8 * 4,
            (Ctrl, Double) => 4 + 2 + 2 + MAX_UNITS_SIZE + 8 * 8,
        }
    }

    /// Unpadded payload size for `count` elements of this type.
    pub fn payload_size(self, count: usize) -> usize {
        self.metadata_size() + count * self.element_size()
    }
}

impl TryFrom<u16> for DbrType {
    type Error = UnknownDbrType;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        DbrType::from_u16(code).ok_or(UnknownDbrType(code))
    }
}

impl From<DbrType> for u16 {
    fn from(dtype: DbrType) -> u16 {
        dtype.as_u16()
    }
}

impl fmt::Display for DbrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.family() {
            DbrFamily::Base => "",
            DbrFamily::Sts => "STS_",
            DbrFamily::Time => "TIME_",
            DbrFamily::Gr => "GR_",
            DbrFamily::Ctrl => "CTRL_",
        };
        write!(f, "DBR_{}{}", family, self.basic_type().name())
    }
}

/// A CA timestamp: seconds and nanoseconds since the EPICS epoch
/// (1990-01-01 00:00:00 UTC).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeStamp {
    pub secs: u32,
    pub nanos: u32,
}

/// A packed value array.
#[derive(Clone, Debug, PartialEq)]
pub enum DbrValue {
    String(Vec<String>),
    Int(Vec<i16>),
    Float(Vec<f32>),
    Enum(Vec<u16>),
    Char(Vec<u8>),
    Long(Vec<i32>),
    Double(Vec<f64>),
}

impl DbrValue {
    pub fn basic_type(&self) -> BasicType {
        match self {
            DbrValue::String(_) => BasicType::String,
            DbrValue::Int(_) => BasicType::Int,
            DbrValue::Float(_) => BasicType::Float,
            DbrValue::Enum(_) => BasicType::Enum,
            DbrValue::Char(_) => BasicType::Char,
            DbrValue::Long(_) => BasicType::Long,
            DbrValue::Double(_) => BasicType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DbrValue::String(v) => v.len(),
            DbrValue::Int(v) => v.len(),
            DbrValue::Float(v) => v.len(),
            DbrValue::Enum(v) => v.len(),
            DbrValue::Char(v) => v.len(),
            DbrValue::Long(v) => v.len(),
            DbrValue::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata prefix for the STS/TIME/GR/CTRL families.
///
/// Unused fields are ignored when packing a family that does not carry them;
/// display and control limits are held as `f64` and narrowed to the native
/// element type on the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DbrMetadata {
    pub status: i16,
    pub severity: i16,
    pub stamp: TimeStamp,
    pub units: String,
    pub precision: i16,
    pub upper_disp_limit: f64,
    pub lower_disp_limit: f64,
    pub upper_alarm_limit: f64,
    pub upper_warning_limit: f64,
    pub lower_warning_limit: f64,
    pub lower_alarm_limit: f64,
    pub upper_ctrl_limit: f64,
    pub lower_ctrl_limit: f64,
    pub enum_strings: Vec<String>,
}

/// A decoded DBR payload: metadata prefix plus value array.
#[derive(Clone, Debug, PartialEq)]
pub struct DbrPayload {
    pub metadata: DbrMetadata,
    pub value: DbrValue,
}

impl DbrPayload {
    /// Payload with default (zeroed) metadata.
    pub fn new(value: DbrValue) -> Self {
        Self {
            metadata: DbrMetadata::default(),
            value,
        }
    }

    pub fn with_metadata(metadata: DbrMetadata, value: DbrValue) -> Self {
        Self { metadata, value }
    }

    pub fn count(&self) -> usize {
        self.value.len()
    }
}

/// Pack `payload` as `dtype`, appending the unpadded bytes to `buf`.
///
/// The value array's element type must match `dtype`.
pub fn encode_payload(
    dtype: DbrType,
    payload: &DbrPayload,
    buf: &mut BytesMut,
) -> Result<(), CommandError> {
    if payload.value.basic_type() != dtype.basic_type() {
        return Err(CommandError::DbrTypeMismatch {
            data_type: dtype.basic_type().name(),
            value: payload.value.basic_type().name(),
        });
    }
    buf.reserve(dtype.payload_size(payload.count()));
    write_metadata(dtype, &payload.metadata, buf)?;
    write_values(&payload.value, buf)
}

fn write_metadata(dtype: DbrType, meta: &DbrMetadata, buf: &mut BytesMut) -> Result<(), CommandError> {
    use BasicType::*;
    use DbrFamily::*;

    let family = dtype.family();
    if family == Base {
        return Ok(());
    }

    buf.put_i16(meta.status);
    buf.put_i16(meta.severity);

    match (family, dtype.basic_type()) {
        (Sts, Char) => buf.put_bytes(0, 1),
        (Sts, Double) => buf.put_bytes(0, 4),
        (Sts, _) => {}
        (Time, basic) => {
            buf.put_u32(meta.stamp.secs);
            buf.put_u32(meta.stamp.nanos);
            match basic {
                Int | Enum => buf.put_bytes(0, 2),
                Char => buf.put_bytes(0, 3),
                Double => buf.put_bytes(0, 4),
                _ => {}
            }
        }
        (Gr, String) | (Ctrl, String) => {}
        (Gr, Enum) | (Ctrl, Enum) => {
            if meta.enum_strings.len() > MAX_ENUM_STATES {
                return Err(CommandError::TooManyEnumStates(meta.enum_strings.len()));
            }
            buf.put_i16(meta.enum_strings.len() as i16);
            for i in 0..MAX_ENUM_STATES {
                let s = meta.enum_strings.get(i).map(|s| s.as_str()).unwrap_or("");
                put_fixed_string(s, MAX_ENUM_STRING_SIZE, "enum state string", buf)?;
            }
        }
        (gr_or_ctrl, basic) => {
            let ctrl = gr_or_ctrl == Ctrl;
            match basic {
                Float => {
                    buf.put_i16(meta.precision);
                    buf.put_bytes(0, 2);
                    put_fixed_string(&meta.units, MAX_UNITS_SIZE, "units", buf)?;
                    write_limits(meta, ctrl, buf, |buf, v| buf.put_f32(v as f32));
                }
                Double => {
                    buf.put_i16(meta.precision);
                    buf.put_bytes(0, 2);
                    put_fixed_string(&meta.units, MAX_UNITS_SIZE, "units", buf)?;
                    write_limits(meta, ctrl, buf, |buf, v| buf.put_f64(v));
                }
                Int => {
                    put_fixed_string(&meta.units, MAX_UNITS_SIZE, "units", buf)?;
                    write_limits(meta, ctrl, buf, |buf, v| buf.put_i16(v as i16));
                }
                Long => {
                    put_fixed_string(&meta.units, MAX_UNITS_SIZE, "units", buf)?;
                    write_limits(meta, ctrl, buf, |buf, v| buf.put_i32(v as i32));
                }
                Char => {
                    put_fixed_string(&meta.units, MAX_UNITS_SIZE, "units", buf)?;
                    write_limits(meta, ctrl, buf, |buf, v| buf.put_i8(v as i8));
                    buf.put_bytes(0, 1);
                }
                String | Enum => unreachable!("handled above"),
            }
        }
    }
    Ok(())
}

/// Display limits in wire order, then control limits for the CTRL family.
fn write_limits(
    meta: &DbrMetadata,
    ctrl: bool,
    buf: &mut BytesMut,
    put: impl Fn(&mut BytesMut, f64),
) {
    put(buf, meta.upper_disp_limit);
    put(buf, meta.lower_disp_limit);
    put(buf, meta.upper_alarm_limit);
    put(buf, meta.upper_warning_limit);
    put(buf, meta.lower_warning_limit);
    put(buf, meta.lower_alarm_limit);
    if ctrl {
        put(buf, meta.upper_ctrl_limit);
        put(buf, meta.lower_ctrl_limit);
    }
}

fn write_values(value: &DbrValue, buf: &mut BytesMut) -> Result<(), CommandError> {
    match value {
        DbrValue::String(vs) => {
            for s in vs {
                put_fixed_string(s, MAX_STRING_SIZE, "string value", buf)?;
            }
        }
        DbrValue::Int(vs) => vs.iter().for_each(|v| buf.put_i16(*v)),
        DbrValue::Float(vs) => vs.iter().for_each(|v| buf.put_f32(*v)),
        DbrValue::Enum(vs) => vs.iter().for_each(|v| buf.put_u16(*v)),
        DbrValue::Char(vs) => buf.put_slice(vs),
        DbrValue::Long(vs) => vs.iter().for_each(|v| buf.put_i32(*v)),
        DbrValue::Double(vs) => vs.iter().for_each(|v| buf.put_f64(*v)),
    }
    Ok(())
}

fn put_fixed_string(
    s: &str,
    width: usize,
    what: &'static str,
    buf: &mut BytesMut,
) -> Result<(), CommandError> {
    let bytes = s.as_bytes();
    if bytes.len() >= width {
        return Err(CommandError::StringTooLong {
            what,
            len: bytes.len(),
            max: width - 1,
        });
    }
    if bytes.contains(&0) {
        return Err(CommandError::EmbeddedNul(what));
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
    Ok(())
}

/// Unpack a payload of `count` elements of `dtype` from `buf`.
///
/// `buf` is the unpadded payload as delimited by the message header; extra
/// trailing bytes (a peer that counted padding) are ignored.
pub fn decode_payload(dtype: DbrType, count: usize, buf: &[u8]) -> Result<DbrPayload, DecodeError> {
    let needed = dtype.payload_size(count);
    if buf.len() < needed {
        return Err(DecodeError::PayloadTooShort {
            expected: needed,
            got: buf.len(),
        });
    }

    let mut r = Reader::new(buf);
    let metadata = read_metadata(dtype, &mut r)?;
    debug_assert_eq!(r.pos, dtype.metadata_size());
    let value = read_values(dtype.basic_type(), count, &mut r)?;
    Ok(DbrPayload { metadata, value })
}

fn read_metadata(dtype: DbrType, r: &mut Reader<'_>) -> Result<DbrMetadata, DecodeError> {
    use BasicType::*;
    use DbrFamily::*;

    let mut meta = DbrMetadata::default();
    let family = dtype.family();
    if family == Base {
        return Ok(meta);
    }

    meta.status = r.get_i16();
    meta.severity = r.get_i16();

    match (family, dtype.basic_type()) {
        (Sts, Char) => r.skip(1),
        (Sts, Double) => r.skip(4),
        (Sts, _) => {}
        (Time, basic) => {
            meta.stamp.secs = r.get_u32();
            meta.stamp.nanos = r.get_u32();
            match basic {
                Int | Enum => r.skip(2),
                Char => r.skip(3),
                Double => r.skip(4),
                _ => {}
            }
        }
        (Gr, String) | (Ctrl, String) => {}
        (Gr, Enum) | (Ctrl, Enum) => {
            let no_str = r.get_i16().clamp(0, MAX_ENUM_STATES as i16) as usize;
            let mut strings = Vec::with_capacity(no_str);
            for i in 0..MAX_ENUM_STATES {
                let s = take_fixed_string(r.get_bytes(MAX_ENUM_STRING_SIZE), "enum state string")?;
                if i < no_str {
                    strings.push(s);
                }
            }
            meta.enum_strings = strings;
        }
        (gr_or_ctrl, basic) => {
            let ctrl = gr_or_ctrl == Ctrl;
            match basic {
                Float => {
                    meta.precision = r.get_i16();
                    r.skip(2);
                    meta.units = take_fixed_string(r.get_bytes(MAX_UNITS_SIZE), "units")?;
                    read_limits(&mut meta, ctrl, |m| f64::from(m.get_f32()), r);
                }
                Double => {
                    meta.precision = r.get_i16();
                    r.skip(2);
                    meta.units = take_fixed_string(r.get_bytes(MAX_UNITS_SIZE), "units")?;
                    read_limits(&mut meta, ctrl, |m| m.get_f64(), r);
                }
                Int => {
                    meta.units = take_fixed_string(r.get_bytes(MAX_UNITS_SIZE), "units")?;
                    read_limits(&mut meta, ctrl, |m| f64::from(m.get_i16()), r);
                }
                Long => {
                    meta.units = take_fixed_string(r.get_bytes(MAX_UNITS_SIZE), "units")?;
                    read_limits(&mut meta, ctrl, |m| f64::from(m.get_i32()), r);
                }
                Char => {
                    meta.units = take_fixed_string(r.get_bytes(MAX_UNITS_SIZE), "units")?;
                    read_limits(&mut meta, ctrl, |m| f64::from(m.get_i8()), r);
                    r.skip(1);
                }
                String | Enum => unreachable!("handled above"),
            }
        }
    }
    Ok(meta)
}

fn read_limits(
    meta: &mut DbrMetadata,
    ctrl: bool,
    get: impl Fn(&mut Reader<'_>) -> f64,
    r: &mut Reader<'_>,
) {
    meta.upper_disp_limit = get(r);
    meta.lower_disp_limit = get(r);
    meta.upper_alarm_limit = get(r);
    meta.upper_warning_limit = get(r);
    meta.lower_warning_limit = get(r);
    meta.lower_alarm_limit = get(r);
    if ctrl {
        meta.upper_ctrl_limit = get(r);
        meta.lower_ctrl_limit = get(r);
    }
}

fn read_values(basic: BasicType, count: usize, r: &mut Reader<'_>) -> Result<DbrValue, DecodeError> {
    Ok(match basic {
        BasicType::String => {
            let mut vs = Vec::with_capacity(count);
            for _ in 0..count {
                vs.push(take_fixed_string(
                    r.get_bytes(MAX_STRING_SIZE),
                    "string value",
                )?);
            }
            DbrValue::String(vs)
        }
        BasicType::Int => DbrValue::Int((0..count).map(|_| r.get_i16()).collect()),
        BasicType::Float => DbrValue::Float((0..count).map(|_| r.get_f32()).collect()),
        BasicType::Enum => DbrValue::Enum((0..count).map(|_| r.get_u16()).collect()),
        BasicType::Char => DbrValue::Char(r.get_bytes(count).to_vec()),
        BasicType::Long => DbrValue::Long((0..count).map(|_| r.get_i32()).collect()),
        BasicType::Double => DbrValue::Double((0..count).map(|_| r.get_f64()).collect()),
    })
}

fn take_fixed_string(cell: &[u8], what: &'static str) -> Result<String, DecodeError> {
    let end = cell.iter().position(|&b| b == 0).unwrap_or(cell.len());
    std::str::from_utf8(&cell[..end])
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidString(what))
}

/// Cursor over a payload slice whose total length was validated up front.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn get_bytes(&mut self, n: usize) -> &'a [u8] {
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        s
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn get_i8(&mut self) -> i8 {
        self.get_bytes(1)[0] as i8
    }

    fn get_i16(&mut self) -> i16 {
        i16::from_be_bytes(self.get_bytes(2).try_into().unwrap())
    }

    fn get_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.get_bytes(2).try_into().unwrap())
    }

    fn get_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.get_bytes(4).try_into().unwrap())
    }

    fn get_i32(&mut self) -> i32 {
        i32::from_be_bytes(self.get_bytes(4).try_into().unwrap())
    }

    fn get_f32(&mut self) -> f32 {
        f32::from_be_bytes(self.get_bytes(4).try_into().unwrap())
    }

    fn get_f64(&mut self) -> f64 {
        f64::from_be_bytes(self.get_bytes(8).try_into().unwrap())
    }
}
