pub mod attenuation;
pub mod compute;
pub mod feed;
pub mod geom;
pub mod profile;
pub mod scene;

// Prelude
pub use attenuation::bands::{NUM_BANDS, Spectrum};
pub use attenuation::parameters::AttenuationParameters;
pub use attenuation::visitor::{Attenuation, PathDirective, PathVisitor};
pub use compute::{CellOutcome, CellScheduler, LevelSink, PointSource, Progress, Receiver,
    SchedulerConfig};
pub use geom::envelope::Envelope;
pub use geom::point::Point;
pub use geom::vector::Vector;
pub use profile::{CutKind, CutPoint, CutProfile};
pub use scene::{Scene, SceneBuilder};
