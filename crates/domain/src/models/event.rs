//! Food event domain models.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dietary tag carried by users (requirements) and events (offerings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodPreference {
    GlutenFree,
    DairyFree,
    Vegetarian,
    Vegan,
}

impl FoodPreference {
    pub const ALL: [FoodPreference; 4] = [
        FoodPreference::GlutenFree,
        FoodPreference::DairyFree,
        FoodPreference::Vegetarian,
        FoodPreference::Vegan,
    ];

    pub fn id(&self) -> i32 {
        match self {
            FoodPreference::GlutenFree => 1,
            FoodPreference::DairyFree => 2,
            FoodPreference::Vegetarian => 3,
            FoodPreference::Vegan => 4,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FoodPreference::GlutenFree => "gluten_free",
            FoodPreference::DairyFree => "dairy_free",
            FoodPreference::Vegetarian => "vegetarian",
            FoodPreference::Vegan => "vegan",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FoodPreference::GlutenFree => "Gluten Free",
            FoodPreference::DairyFree => "Dairy Free",
            FoodPreference::Vegetarian => "Vegetarian",
            FoodPreference::Vegan => "Vegan",
        }
    }
}

impl FromStr for FoodPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("Invalid food preference: {}", s))
    }
}

impl fmt::Display for FoodPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A food event posted by a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub host_id: Uuid,
    pub title: String,
    pub details: Option<String>,
    pub location: String,
    pub servings: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub food_preferences: BTreeSet<FoodPreference>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }
}

/// Fields required to create an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub details: Option<String>,
    pub location: String,
    pub servings: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub food_preferences: BTreeSet<FoodPreference>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_food_preference_ids() {
        for pref in FoodPreference::ALL {
            assert_eq!(FoodPreference::from_id(pref.id()), Some(pref));
        }
        assert_eq!(FoodPreference::from_id(0), None);
        assert_eq!(FoodPreference::from_id(5), None);
    }

    #[test]
    fn test_food_preference_from_str() {
        assert_eq!(
            FoodPreference::from_str("Gluten Free").unwrap(),
            FoodPreference::GlutenFree
        );
        assert_eq!(
            FoodPreference::from_str("dairy-free").unwrap(),
            FoodPreference::DairyFree
        );
        assert_eq!(
            FoodPreference::from_str("vegan").unwrap(),
            FoodPreference::Vegan
        );
        assert!(FoodPreference::from_str("keto").is_err());
    }

    #[test]
    fn test_event_has_ended() {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            title: "Pizza".to_string(),
            details: None,
            location: "Sennott Square".to_string(),
            servings: 20,
            start_date: now - chrono::Duration::hours(2),
            end_date: now - chrono::Duration::hours(1),
            food_preferences: BTreeSet::new(),
            created_at: now,
        };
        assert!(event.has_ended(now));
        assert!(!event.has_ended(now - chrono::Duration::hours(3)));
    }
}
