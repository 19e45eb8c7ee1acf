pub mod attendance_service;
pub mod device_service;
pub mod otp_service;
pub mod pending_store;
pub mod proximity_service;
pub mod session_service;
