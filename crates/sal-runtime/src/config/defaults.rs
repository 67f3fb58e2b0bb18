//! Compile-time defaults generated by build.rs
//!
//! Override at build time by pointing `SAL_CONFIG_RS` at a file of
//! `pub const NAME: TYPE = VALUE;` lines.

include!(concat!(env!("OUT_DIR"), "/sal_merged_config.rs"));
