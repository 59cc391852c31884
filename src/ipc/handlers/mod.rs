pub mod assistant;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod enrollment;
pub mod fees;
pub mod reports;
pub mod session;
pub mod students;
