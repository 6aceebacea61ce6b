//! Pure domain helpers: quality tiers, time-spec parsing, duration
//! formatting, and progress-percentage translation. No I/O here.

/// Coarse resolution ceiling forwarded to the media fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    P1080,
    P720,
    P360,
    Best,
}

impl QualityTier {
    /// Any string outside the three named tiers (including absent) selects
    /// the best available tier. Unknown values are not an error.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("1080p") => Self::P1080,
            Some("720p") => Self::P720,
            Some("360p") => Self::P360,
            _ => Self::Best,
        }
    }

    pub fn height_cap(&self) -> Option<u32> {
        match self {
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P360 => Some(360),
            Self::Best => None,
        }
    }
}

/// Parse a clip bound given as `H:MM:SS`, `MM:SS`, or plain seconds.
/// Empty or unparseable input yields zero rather than an error; submitters
/// are never rejected over a malformed time field.
pub fn parse_time_spec(raw: &str) -> u64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return 0;
    }
    let mut total = 0u64;
    for part in parts {
        let Ok(value) = part.trim().parse::<u64>() else {
            return 0;
        };
        total = total * 60 + value;
    }
    total
}

/// A start of zero means no leading trim; an end at or before the start is
/// ignored and treated as "no end bound".
pub fn normalize_clip_range(start: u64, end: Option<u64>) -> (u64, Option<u64>) {
    match end {
        Some(e) if e > start => (start, Some(e)),
        _ => (start, None),
    }
}

/// `H:MM:SS` for durations of an hour or more, `MM:SS` below that.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Translate a transfer snapshot into a stored percentage. An exact total
/// wins over an estimate; a zero or unknown total keeps the last value; the
/// result never regresses below `last`, so pollers see monotonic progress.
pub fn percent_complete(
    downloaded_bytes: u64,
    total_bytes: Option<u64>,
    total_bytes_estimate: Option<u64>,
    last: u8,
) -> u8 {
    let total = match (total_bytes, total_bytes_estimate) {
        (Some(t), _) if t > 0 => t,
        (_, Some(e)) if e > 0 => e,
        _ => return last,
    };
    let percent = (downloaded_bytes.saturating_mul(100) / total).min(100) as u8;
    percent.max(last)
}
