pub mod attendance_record;
pub mod attendance_request;
pub mod session;
