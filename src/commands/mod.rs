pub mod hindsight;
pub mod score;
