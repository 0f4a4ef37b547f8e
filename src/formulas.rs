//! Body composition formulas
//!
//! The engine computes every derived value through the `FormulaLibrary`
//! trait. The units of each input and output are fixed; the equations
//! themselves are a policy and can be swapped by implementing the trait.
//!
//! `StandardFormulas` uses:
//! - BMI = weight / height_m²
//! - Lean body mass = weight x (1 - body_fat / 100)
//! - Fat mass = weight x body_fat / 100
//! - FFMI = lean_mass / height_m²
//! - BMR: Mifflin-St Jeor (1990), with age and sex taken from `BmrProfile`
//! - BSA: Du Bois & Du Bois (1916)
//!
//! # Scientific References
//!
//! - Mifflin, M.D., et al. (1990). A new predictive equation for resting energy expenditure.
//!   *American Journal of Clinical Nutrition*, 51(2), 241-247.
//! - Du Bois, D., & Du Bois, E.F. (1916). A formula to estimate the approximate surface area
//!   if height and weight be known. *Archives of Internal Medicine*, 17(6), 863-871.
//! - Kouri, E.M., et al. (1995). Fat-free mass index in users and nonusers of anabolic-androgenic
//!   steroids. *Clinical Journal of Sport Medicine*, 5(4), 223-228.

use serde::{Deserialize, Serialize};

/// Pure functions computing each derived value from raw inputs
pub trait FormulaLibrary {
    /// Body mass index from kg and cm
    fn bmi(&self, weight_kg: f64, height_cm: f64) -> f64;

    /// Basal metabolic rate in kcal/day from kg and cm
    fn bmr(&self, weight_kg: f64, height_cm: f64) -> f64;

    /// Body surface area in m² from kg and cm
    fn bsa(&self, weight_kg: f64, height_cm: f64) -> f64;

    /// Lean body mass in kg from kg and body fat %
    fn lean_body_mass(&self, weight_kg: f64, body_fat_pct: f64) -> f64;

    /// Fat mass in kg from kg and body fat %
    fn fat_mass(&self, weight_kg: f64, body_fat_pct: f64) -> f64;

    /// Fat-free mass index from lean mass (kg) and height (cm)
    fn ffmi(&self, lean_mass_kg: f64, height_cm: f64) -> f64;
}

/// Biological sex used for the Mifflin-St Jeor constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unspecified,
}

impl Sex {
    /// Mifflin-St Jeor constant term (kcal/day)
    pub fn mifflin_constant(&self) -> f64 {
        match self {
            Sex::Male => 5.0,
            Sex::Female => -161.0,
            // Midpoint of the two published constants
            Sex::Unspecified => -78.0,
        }
    }
}

/// Default age used when the profile does not carry one
pub const DEFAULT_BMR_AGE_YEARS: u32 = 30;

/// Person-level constants the BMR equation needs besides weight and height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BmrProfile {
    pub age_years: u32,
    #[serde(default)]
    pub sex: Sex,
}

impl Default for BmrProfile {
    fn default() -> Self {
        Self {
            age_years: DEFAULT_BMR_AGE_YEARS,
            sex: Sex::Unspecified,
        }
    }
}

/// Standard published equations
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StandardFormulas {
    profile: BmrProfile,
}

impl StandardFormulas {
    pub fn new(profile: BmrProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> BmrProfile {
        self.profile
    }
}

fn height_m_squared(height_cm: f64) -> f64 {
    let height_m = height_cm / 100.0;
    height_m * height_m
}

impl FormulaLibrary for StandardFormulas {
    fn bmi(&self, weight_kg: f64, height_cm: f64) -> f64 {
        weight_kg / height_m_squared(height_cm)
    }

    fn bmr(&self, weight_kg: f64, height_cm: f64) -> f64 {
        let weight_component = 10.0 * weight_kg;
        let height_component = 6.25 * height_cm;
        let age_component = -5.0 * f64::from(self.profile.age_years);

        (weight_component + height_component + age_component + self.profile.sex.mifflin_constant())
            .max(0.0)
    }

    fn bsa(&self, weight_kg: f64, height_cm: f64) -> f64 {
        0.007184 * weight_kg.powf(0.425) * height_cm.powf(0.725)
    }

    fn lean_body_mass(&self, weight_kg: f64, body_fat_pct: f64) -> f64 {
        weight_kg * (1.0 - body_fat_pct / 100.0)
    }

    fn fat_mass(&self, weight_kg: f64, body_fat_pct: f64) -> f64 {
        weight_kg * body_fat_pct / 100.0
    }

    fn ffmi(&self, lean_mass_kg: f64, height_cm: f64) -> f64 {
        lean_mass_kg / height_m_squared(height_cm)
    }
}
