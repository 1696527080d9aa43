pub mod init;
pub mod list;
pub mod logs;
pub mod run;
pub mod status;
pub mod stop;
