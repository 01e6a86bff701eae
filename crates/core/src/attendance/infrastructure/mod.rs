pub mod http_attendance_backend;
pub mod in_memory_attendance_backend;
