//! Identity metadata stored in fixture offsets.
//!
//! GRBL has no user storage, so a unit's serial number and model are packed
//! into the G58 and G59 work offsets. Each six-character string becomes three
//! little-endian `u16` words, written as the integer parts of X, Y and Z. The
//! fractional thousandths carry one byte each: zero for the serial slot and a
//! marker for the model slot, so a controller whose offsets were never written
//! is recognized as having no metadata.
//!
//! Fractions are written as `d * 10 + 5`. The firmware stores offsets as
//! single-precision floats and reports them rounded to thousandths; the `+5`
//! bias keeps a report that is off by up to four thousandths decoding to `d`.

use grblink_core::{ControllerError, MetadataRecord};
use serde::{Deserialize, Serialize};

/// Fixture slot (`P5`, G58) holding the serial number
pub const SERIAL_SLOT: u8 = 5;

/// Fixture slot (`P6`, G59) holding the model and the marker
pub const MODEL_SLOT: u8 = 6;

const FIELD_LEN: usize = MetadataRecord::FIELD_LEN;

/// Marker fractions stored alongside the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataMagic([u8; 3]);

impl MetadataMagic {
    /// Default marker
    pub const DEFAULT: MetadataMagic = MetadataMagic([12, 9, 68]);

    /// Build a marker; each component must fit in two decimal digits
    pub fn new(values: [u8; 3]) -> Result<Self, ControllerError> {
        if let Some(v) = values.iter().find(|v| **v > 99) {
            return Err(ControllerError::invalid(
                "metadata_magic",
                format!("{} does not fit in two digits", v),
            ));
        }
        Ok(Self(values))
    }

    /// The three components
    pub fn values(&self) -> [u8; 3] {
        self.0
    }
}

impl Default for MetadataMagic {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Pack a field into three words, space padded
fn pack_field(name: &str, value: &str) -> Result<[u16; 3], ControllerError> {
    if !value.is_ascii() {
        return Err(ControllerError::invalid(name, "must be ASCII"));
    }
    if value.len() > FIELD_LEN {
        return Err(ControllerError::invalid(
            name,
            format!("'{}' is longer than {} characters", value, FIELD_LEN),
        ));
    }
    let mut bytes = [b' '; FIELD_LEN];
    bytes[..value.len()].copy_from_slice(value.as_bytes());
    Ok([
        u16::from_le_bytes([bytes[0], bytes[1]]),
        u16::from_le_bytes([bytes[2], bytes[3]]),
        u16::from_le_bytes([bytes[4], bytes[5]]),
    ])
}

fn offset_command(slot: u8, words: [u16; 3], fractions: [u8; 3]) -> String {
    let frac = |d: u8| u32::from(d) * 10 + 5;
    format!(
        "G10 L2 P{} X{}.{:03} Y{}.{:03} Z{}.{:03}",
        slot,
        words[0],
        frac(fractions[0]),
        words[1],
        frac(fractions[1]),
        words[2],
        frac(fractions[2])
    )
}

/// Encode a record as the two `G10 L2` commands that store it.
///
/// The serial number goes first (slot 5), then the model (slot 6).
pub fn encode_metadata(
    record: &MetadataRecord,
    magic: MetadataMagic,
) -> Result<[String; 2], ControllerError> {
    let serial = pack_field("serial_number", &record.serial_number)?;
    let model = pack_field("model", &record.model)?;
    Ok([
        offset_command(SERIAL_SLOT, serial, [0, 0, 0]),
        offset_command(MODEL_SLOT, model, magic.values()),
    ])
}

/// One reported coordinate split at the decimal point
struct Coordinate<'a> {
    whole: &'a str,
    fraction: u8,
}

fn parse_coordinate<'a>(line: &str, field: &'a str) -> Result<Coordinate<'a>, ControllerError> {
    let (whole, frac) = field
        .trim()
        .split_once('.')
        .ok_or_else(|| ControllerError::malformed(line, format!("'{}' has no fraction", field)))?;
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ControllerError::malformed(line, format!("bad fraction in '{}'", field)));
    }
    // Thousandths, padding short fractions ("5" is 500)
    let thousandths = frac
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(3)
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    Ok(Coordinate {
        whole,
        fraction: (thousandths / 10) as u8,
    })
}

fn parse_slot(line: &str) -> Result<[Coordinate<'_>; 3], ControllerError> {
    let (_, coords) = line
        .split_once(':')
        .ok_or_else(|| ControllerError::malformed(line, "expected name:x,y,z"))?;
    let fields: Vec<&str> = coords.split(',').collect();
    match fields.as_slice() {
        [x, y, z] => Ok([
            parse_coordinate(line, *x)?,
            parse_coordinate(line, *y)?,
            parse_coordinate(line, *z)?,
        ]),
        _ => Err(ControllerError::malformed(line, "expected three coordinates")),
    }
}

fn unpack_field(line: &str, coords: &[Coordinate<'_>; 3]) -> Result<String, ControllerError> {
    let mut bytes = Vec::with_capacity(FIELD_LEN);
    for c in coords {
        let word: u16 = c.whole.parse().map_err(|_| {
            ControllerError::malformed(line, format!("'{}' is not a packed word", c.whole))
        })?;
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    if !bytes.is_ascii() {
        return Err(ControllerError::malformed(line, "packed field is not ASCII"));
    }
    let text = String::from_utf8(bytes)
        .map_err(|_| ControllerError::malformed(line, "packed field is not ASCII"))?;
    Ok(text.trim_end().to_string())
}

fn find_slot<'a, S: AsRef<str>>(lines: &'a [S], name: &str) -> Result<&'a str, ControllerError> {
    for line in lines {
        let line: &str = line.as_ref();
        if line.split_once(':').map(|(n, _)| n) == Some(name) {
            return Ok(line);
        }
    }
    let seen: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    Err(ControllerError::malformed(
        seen.join(" | "),
        format!("{} offset missing", name),
    ))
}

/// Decode metadata from the unbracketed lines of a `$#` report.
///
/// Returns `Ok(None)` when the model slot does not carry `magic`.
pub fn decode_metadata<S: AsRef<str>>(
    lines: &[S],
    magic: MetadataMagic,
) -> Result<Option<MetadataRecord>, ControllerError> {
    let serial_line = find_slot(lines, "G58")?;
    let model_line = find_slot(lines, "G59")?;
    let serial = parse_slot(serial_line)?;
    let model = parse_slot(model_line)?;

    let marker = [model[0].fraction, model[1].fraction, model[2].fraction];
    if marker != magic.values() {
        tracing::debug!(?marker, "No metadata marker in G59");
        return Ok(None);
    }

    Ok(Some(MetadataRecord {
        serial_number: unpack_field(serial_line, &serial)?,
        model: unpack_field(model_line, &model)?,
    }))
}
