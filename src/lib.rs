pub mod backends;
pub mod config;
pub mod docx;
pub mod error;
pub mod guard;
pub mod ir;
pub mod pipeline;
pub mod progress;
pub mod sentinels;
pub mod textutil;
