//! GRBL Status Report Parsing
//!
//! Parses the inside of a `<...>` status report, e.g.
//! `Idle|MPos:0.000,0.000,0.000|FS:0,0`, into a [`ControllerStatus`].
//! Also parses the `name:x,y,z` coordinate lines of the `$#` report.

use grblink_core::{Axis, AxisPosition, ControllerError, ControllerStatus};

/// Parse `x,y,z` into a position over all three axes.
///
/// Extra trailing fields are ignored; fewer than three is an error.
pub fn parse_coordinates(csv: &str) -> Result<AxisPosition, ControllerError> {
    let mut pos = AxisPosition::new();
    let mut fields = csv.split(',');
    for axis in Axis::ALL {
        let field = fields
            .next()
            .ok_or_else(|| ControllerError::malformed(csv, format!("missing {} coordinate", axis)))?;
        let value = field.trim().parse::<f64>().map_err(|_| {
            ControllerError::malformed(csv, format!("bad {} coordinate '{}'", axis, field))
        })?;
        if !value.is_finite() {
            return Err(ControllerError::malformed(csv, "non-finite coordinate"));
        }
        pos.set(axis, value);
    }
    Ok(pos)
}

/// Parse a status report body (delimiters already removed)
///
/// The first `|` field is the state token; `MPos:` is required. The other
/// fields are kept verbatim in [`ControllerStatus::telemetry`].
pub fn parse_status(body: &str) -> Result<ControllerStatus, ControllerError> {
    let mut fields = body.split('|');
    let state = fields
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ControllerError::malformed(body, "missing state"))?;

    // GRBL 1.1 may append a sub-state, e.g. `Hold:0`
    let state = state.split(':').next().unwrap_or(state).to_string();

    let mut mpos = None;
    let mut telemetry = Vec::new();
    for field in fields {
        if let Some(coords) = field.strip_prefix("MPos:") {
            mpos = Some(parse_coordinates(coords).map_err(|e| match e {
                ControllerError::MalformedResponse { reason, .. } => {
                    ControllerError::malformed(body, reason)
                }
                other => other,
            })?);
        } else {
            telemetry.push(field.to_string());
        }
    }

    let mpos = mpos.ok_or_else(|| ControllerError::malformed(body, "missing MPos field"))?;
    Ok(ControllerStatus {
        state,
        mpos,
        telemetry,
    })
}

/// Parse a named `$#` line like `G54:1.000,2.000,3.000`
pub fn parse_named_coordinates(line: &str) -> Result<(&str, AxisPosition), ControllerError> {
    let (name, coords) = line
        .split_once(':')
        .ok_or_else(|| ControllerError::malformed(line, "expected name:x,y,z"))?;
    Ok((name, parse_coordinates(coords)?))
}
