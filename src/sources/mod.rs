//! Shipped site adapters.
//!
//! | id | site | format |
//! |----|------|--------|
//! | `desu` | desu.me | JSON API |
//! | `newbie` | newmanga.org | JSON API, branches, sliced pages |
//! | `comx` | com-x.life | HTML with embedded JSON |
//! | `mangaalarab` | mangaalarab.com | HTML |
//! | `baozimanhua` | baozimh.com | HTML |

mod baozimanhua;
mod comx;
mod desu;
mod mangaalarab;
mod newbie;

pub use baozimanhua::Baozimanhua;
pub use comx::ComX;
pub use desu::Desu;
pub use mangaalarab::MangaAlarab;
pub use newbie::Newbie;

use url::Url;

use crate::error::SourceError;
use crate::transport::TransportError;

/// Parses an adapter base URL.
fn parse_base_url(value: &str) -> Result<Url, SourceError> {
    Url::parse(value).map_err(|e| TransportError::invalid_url(value, e).into())
}

/// Five-star rendering of a 0-10 score, half stars as `✬`.
fn rating_stars(score: f32) -> &'static str {
    match score {
        s if s > 9.5 => "★★★★★",
        s if s > 8.5 => "★★★★✬",
        s if s > 7.5 => "★★★★☆",
        s if s > 6.5 => "★★★✬☆",
        s if s > 5.5 => "★★★☆☆",
        s if s > 4.5 => "★★✬☆☆",
        s if s > 3.5 => "★★☆☆☆",
        s if s > 2.5 => "★✬☆☆☆",
        s if s > 1.5 => "★☆☆☆☆",
        s if s > 0.5 => "✬☆☆☆☆",
        _ => "☆☆☆☆☆",
    }
}

/// `12.0` → `"12"`, `12.5` → `"12.5"`, at most two decimals.
fn format_number(value: f32) -> String {
    let formatted = format!("{value:.2}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
