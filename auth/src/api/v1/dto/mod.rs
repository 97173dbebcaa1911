pub mod device_approval;
