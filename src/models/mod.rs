pub mod aggregate;
pub mod filespec;
pub mod individual;
pub mod key;
pub mod options;
pub mod pairwise;
pub mod similarity;
pub mod summary;
pub mod task;
pub mod timestamp;
