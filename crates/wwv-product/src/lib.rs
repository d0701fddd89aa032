//! Phase 3: the corrected product generator (C11) and daily packager
//! (C12), the two consumers of Phase 1's raw archive and Phase 2's
//! `D_clock` series.

pub mod clock_series;
pub mod generator;
pub mod packager;

pub use clock_series::{ClockOffsetRecord, ClockOffsetSeries};
pub use generator::{
    align_to_utc, generate_corrected_product, read_corrected_product_iq, CorrectedProductMeta,
    TimedSample,
};
pub use packager::{compute_day_completeness, package_day, DayCompleteness, SubchannelInput};
