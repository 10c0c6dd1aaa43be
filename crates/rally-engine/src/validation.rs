use std::collections::HashSet;

use rally_types::api::NominateRequest;
use rally_types::models::Location;

use crate::error::{Error, Result};

pub const TASTE_OPTIONS: [&str; 15] = [
    "川菜", "粤菜", "湘菜", "东北菜", "火锅", "烧烤", "日料", "韩餐", "西餐", "快餐", "面食",
    "小吃", "海鲜", "素食", "甜品",
];
pub const MAX_TASTES: usize = 5;

const NICKNAME_MAX: usize = 20;
const GATHERING_NAME_MAX: usize = 50;
const PLACE_NAME_MAX: usize = 100;

fn bounded_text(value: &str, field: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(Error::InvalidInput(format!("{field} must be at most {max} characters")));
    }
    Ok(trimmed.to_string())
}

/// Returns the trimmed nickname.
pub fn nickname(value: &str) -> Result<String> {
    bounded_text(value, "Nickname", NICKNAME_MAX)
}

/// Returns the trimmed gathering name.
pub fn gathering_name(value: &str) -> Result<String> {
    bounded_text(value, "Gathering name", GATHERING_NAME_MAX)
}

pub fn tastes(values: &[String]) -> Result<()> {
    if values.len() > MAX_TASTES {
        return Err(Error::InvalidInput(format!("At most {MAX_TASTES} tastes")));
    }
    if let Some(bad) = values.iter().find(|t| !TASTE_OPTIONS.contains(&t.as_str())) {
        return Err(Error::InvalidInput(format!("Unknown taste: {bad}")));
    }
    let unique: HashSet<&String> = values.iter().collect();
    if unique.len() != values.len() {
        return Err(Error::InvalidInput("Duplicate tastes".into()));
    }
    Ok(())
}

pub fn location(loc: &Location) -> Result<()> {
    if !loc.lng.is_finite() || !loc.lat.is_finite() {
        return Err(Error::InvalidInput("Coordinates must be finite".into()));
    }
    if !(-180.0..=180.0).contains(&loc.lng) {
        return Err(Error::InvalidInput("Longitude must be within -180..180".into()));
    }
    if !(-90.0..=90.0).contains(&loc.lat) {
        return Err(Error::InvalidInput("Latitude must be within -90..90".into()));
    }
    Ok(())
}

pub fn nomination(req: &NominateRequest) -> Result<()> {
    if req.place_id.trim().is_empty() {
        return Err(Error::InvalidInput("Place id must not be empty".into()));
    }
    bounded_text(&req.name, "Place name", PLACE_NAME_MAX)?;
    location(&req.location)?;
    if let Some(rating) = req.rating {
        if !(0.0..=5.0).contains(&rating) {
            return Err(Error::InvalidInput("Rating must be within 0..5".into()));
        }
    }
    if let Some(cost) = req.cost {
        if !cost.is_finite() || cost < 0.0 {
            return Err(Error::InvalidInput("Cost must be non-negative".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_is_trimmed_and_bounded() {
        assert_eq!(nickname("  Ana ").unwrap(), "Ana");
        assert!(nickname("   ").is_err());
        assert!(nickname(&"字".repeat(20)).is_ok());
        assert!(nickname(&"字".repeat(21)).is_err());
    }

    #[test]
    fn tastes_must_be_known_unique_and_few() {
        let ok: Vec<String> = vec!["火锅".into(), "日料".into()];
        assert!(tastes(&ok).is_ok());

        let unknown: Vec<String> = vec!["pizza".into()];
        assert!(tastes(&unknown).is_err());

        let dup: Vec<String> = vec!["火锅".into(), "火锅".into()];
        assert!(tastes(&dup).is_err());

        let many: Vec<String> = TASTE_OPTIONS[..6].iter().map(|s| s.to_string()).collect();
        assert!(tastes(&many).is_err());
    }

    #[test]
    fn coordinates_are_range_checked() {
        assert!(location(&Location { lng: 180.0, lat: -90.0 }).is_ok());
        assert!(location(&Location { lng: 180.1, lat: 0.0 }).is_err());
        assert!(location(&Location { lng: 0.0, lat: f64::NAN }).is_err());
    }
}
