//! Output path layout for the rotating writer.
//!
//! Destination arenas live at
//! `<savepath>/YYYY/MM/DD/<source_relpath>@<ISO8601-with-nanoseconds-and-offset>.a0`.

use std::fmt;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    EmptyComponent { field: &'static str },
    InvalidComponent { field: &'static str, value: String },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::EmptyComponent { field } => {
                write!(f, "empty path component: {field}")
            }
            LayoutError::InvalidComponent { field, value } => {
                write!(f, "invalid path component for {field}: {value}")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

type Result<T> = std::result::Result<T, LayoutError>;

fn validate_relpath(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(LayoutError::EmptyComponent { field });
    }
    if value.contains('\0') || value.split('/').any(|part| part == "..") {
        return Err(LayoutError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Builds the dated output directory for a save: `<savepath>/YYYY/MM/DD`.
pub fn dated_dir(savepath: &Path, wall_time: OffsetDateTime) -> PathBuf {
    savepath
        .join(format!("{:04}", wall_time.year()))
        .join(format!("{:02}", u8::from(wall_time.month())))
        .join(format!("{:02}", wall_time.day()))
}

/// Builds the full output path for a new rotation of `source_relpath`,
/// opened at `wall_time`.
///
/// `source_relpath` is the discovered source's path relative to `A0_ROOT`
/// (e.g. `foo.pubsub.a0`); it is embedded verbatim before the `@<ts>.a0`
/// suffix.
pub fn dated_output_path(
    savepath: &Path,
    source_relpath: &str,
    wall_time: OffsetDateTime,
) -> Result<PathBuf> {
    validate_relpath("source_relpath", source_relpath)?;
    let dir = dated_dir(savepath, wall_time);
    let filename = format!("{source_relpath}@{}.a0", format_iso8601_nanos(wall_time));
    Ok(dir.join(filename))
}

/// Formats `ts` as `YYYY-MM-DDTHH:MM:SS.nnnnnnnnn±HH:MM`: nanosecond
/// precision, explicit numeric offset, never `Z`.
pub fn format_iso8601_nanos(ts: OffsetDateTime) -> String {
    let offset = ts.offset();
    let total_minutes = offset.whole_minutes();
    let sign = if total_minutes < 0 { '-' } else { '+' };
    let offset_h = total_minutes.abs() / 60;
    let offset_m = total_minutes.abs() % 60;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}{}{:02}:{:02}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.nanosecond(),
        sign,
        offset_h,
        offset_m,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_nanos_and_offset() {
        let ts = datetime!(2021-10-19 21:43:52.866_409_862 -0:00);
        assert_eq!(
            format_iso8601_nanos(ts),
            "2021-10-19T21:43:52.866409862-00:00"
        );
    }

    #[test]
    fn builds_dated_path() {
        let ts = datetime!(2026-01-05 08:09:10.0 +2:00);
        let path = dated_output_path(Path::new("/save"), "foo.pubsub.a0", ts).unwrap();
        assert_eq!(
            path,
            PathBuf::from(
                "/save/2026/01/05/foo.pubsub.a0@2026-01-05T08:09:10.000000000+02:00.a0"
            )
        );
    }

    #[test]
    fn rejects_path_traversal() {
        let ts = datetime!(2026-01-05 08:09:10.0 +0:00);
        let err = dated_output_path(Path::new("/save"), "../etc/passwd", ts).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidComponent { .. }));
    }
}
