pub mod fasta;
pub mod interleave;
pub mod prep;
pub mod read_counts;

pub use fasta::fastq_to_fasta;
pub use interleave::interleave;
pub use prep::{PrepError, PrepOptions};
