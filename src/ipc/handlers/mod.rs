pub mod announcements;
pub mod attendance;
pub mod backlog;
pub mod backup;
pub mod classes;
pub mod core;
pub mod homework;
pub mod leave;
pub mod profile;
pub mod results;
pub mod setup;
pub mod students;
pub mod teachers;
pub mod timetable;
