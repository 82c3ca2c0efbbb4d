// Processing stages from raw sensor curves to corrected depth

pub mod calibration;
pub mod correction;
pub mod derivation;
pub mod dvl;
pub mod sync;
pub mod transform;

pub use calibration::{approximate, calibrate, Approximation, Calibration};
pub use correction::{candle_correction, leaving_correction, length_correction};
pub use derivation::{
    bit_position, depth_from_bit_position, interval_lengths, interval_params, BitPosition, Direction, Edge, IntervalParams,
};
pub use dvl::{synthesize_prz, time_correction, DvlPoint};
pub use sync::{sync_factor_is_ok, synchronize, SyncCandidate, SyncReport};
pub use transform::prz_transform;
