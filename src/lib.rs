//! # pipe-sieve: a prime sieve made of processes
//!
//! Computes the primes below a bound with a chain of workers, each owning one
//! prime and connected to the next by a one-way pipe:
//!
//! ```text
//! Feeder ──► Stage(2) ──► Stage(3) ──► Stage(5) ──► … ──► Stage(<empty>)
//! ```
//!
//! The feeder writes the candidate range into the first stage. Each stage
//! takes the first value it reads as its prime, prints `prime P`, forwards
//! only values not divisible by `P` to a child stage it launches on demand,
//! and finally closes its output and reaps its child. End-of-stream travels
//! down the chain as write ends are closed; reaps unwind back up to the
//! feeder.
//!
//! ## Architecture
//!
//! - **Stage**: the state machine run by every worker ([`stage`])
//! - **Feeder**: seeds the pipeline and waits for it ([`feeder`])
//! - **Backends**: where stages run, one OS process each or one thread each
//!   ([`backend`])
//! - **Channel**: fixed-width integer framing over any byte stream ([`channel`])
//! - **Record**: the `prime P` output lines ([`record`])
//!
//! ## Example
//!
//! ```ignore
//! use pipe_sieve::{Feeder, SharedRecord, ThreadLauncher};
//!
//! let record = SharedRecord::new();
//! let launcher = ThreadLauncher::new(record.clone()).with_ceiling(35);
//! Feeder::new(2..35).run(&launcher)?;
//!
//! assert_eq!(record.primes(), vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31]);
//! ```

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod feeder;
pub mod record;
pub mod stage;

// Re-export commonly used types
pub use backend::{ProcessLauncher, StageHandle, StageLauncher, ThreadLauncher};
pub use config::{Backend, SieveConfig};
pub use error::{Result, SieveError};
pub use feeder::{Feeder, FeederReport};
pub use record::SharedRecord;
pub use stage::{Stage, StageReport, StageState};
