pub mod farmers;
pub mod health;
pub mod runs;
pub mod scheduler;
