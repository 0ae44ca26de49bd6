pub mod bundle;
pub mod command;
pub mod condor;
pub mod config;
pub mod context;
pub mod dataset;
pub mod filter;
pub mod grouping;
pub mod logging;
pub mod lumis;
pub mod metadata;
pub mod runs;
pub mod storage;
