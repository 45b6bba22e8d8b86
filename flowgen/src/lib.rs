#![doc(issue_tracker_base_url = "https://github.com/flowlabs/flowgen/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Multi-core flow scheduling and distribution engine for high-rate
//! traffic generation.

pub use flowgen_common::{ring, CoreContext, StartBarrier, Tick};
pub use flowgen_sched::*;
pub use flowgen_sim::*;
pub use flowgen_vm::*;
