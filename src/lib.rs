pub mod domain;
pub mod error;
pub mod layout;
pub mod matching;
pub mod pdbfile;
pub mod rcsb;
pub mod scheduler;
pub mod sink;
pub mod split;
pub mod uniprot;
