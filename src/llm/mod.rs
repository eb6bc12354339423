//! LLM服务接入层

pub mod client;

pub use client::LLMClient;
