pub mod auth;
pub mod media;
pub mod seeder;
pub mod uploads;
