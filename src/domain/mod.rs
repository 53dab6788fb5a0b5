pub mod competitor;
pub mod startup_profile;
