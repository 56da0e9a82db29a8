use serde::{Deserialize, Serialize};

/// Pixel rejection algorithm used when integrating a stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionMethod {
    /// Chosen from the frame count at integration time.
    #[default]
    Auto,
    NoRejection,
    MinMax,
    PercentileClip,
    SigmaClip,
    WinsorizedSigmaClip,
    AveragedSigmaClip,
    LinearFit,
    /// Deprecated CCD noise model clipping.
    CcdClip,
}

impl RejectionMethod {
    /// The concrete algorithm for a stack of `n` frames.
    pub fn resolve(self, n: usize) -> Self {
        match self {
            Self::Auto => best_rejection_method(n),
            other => other,
        }
    }
}

impl std::fmt::Display for RejectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "Auto"),
            Self::NoRejection => write!(f, "No rejection"),
            Self::MinMax => write!(f, "Min/Max"),
            Self::PercentileClip => write!(f, "Percentile Clipping"),
            Self::SigmaClip => write!(f, "Sigma Clipping"),
            Self::WinsorizedSigmaClip => write!(f, "Winsorized Sigma Clipping"),
            Self::AveragedSigmaClip => write!(f, "Averaged Sigma Clipping"),
            Self::LinearFit => write!(f, "Linear Fit Clipping"),
            Self::CcdClip => write!(f, "CCD Clipping"),
        }
    }
}

/// Recommended algorithm for a stack of `n` frames.
pub fn best_rejection_method(n: usize) -> RejectionMethod {
    if n < 8 {
        RejectionMethod::PercentileClip
    } else if n <= 10 {
        RejectionMethod::AveragedSigmaClip
    } else if n < 20 {
        RejectionMethod::WinsorizedSigmaClip
    } else {
        RejectionMethod::LinearFit
    }
}

/// Assessment of a rejection algorithm for a given stack size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionVerdict {
    Good,
    /// Usable, but likely not the best choice.
    Suboptimal(String),
    Unsuitable(String),
}

impl RejectionVerdict {
    /// `false` only for [`RejectionVerdict::Unsuitable`].
    pub fn is_good(&self) -> bool {
        !matches!(self, Self::Unsuitable(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Good => None,
            Self::Suboptimal(r) | Self::Unsuitable(r) => Some(r),
        }
    }
}

fn unsuitable(reason: &str) -> RejectionVerdict {
    RejectionVerdict::Unsuitable(reason.to_string())
}

/// Validate `selected` for a stack of `n` frames.
pub fn rejection_is_good(selected: RejectionMethod, n: usize) -> RejectionVerdict {
    match selected.resolve(n) {
        RejectionMethod::NoRejection => unsuitable("No pixel rejection algorithm has been selected"),
        RejectionMethod::MinMax => {
            unsuitable("Min/Max rejection should not be used for production work")
        }
        RejectionMethod::CcdClip => unsuitable("CCD clipping rejection has been deprecated"),
        RejectionMethod::PercentileClip if n > 8 => unsuitable(
            "Percentile clipping should only be used for small sets of eight or less images",
        ),
        RejectionMethod::SigmaClip if n < 8 => unsuitable(
            "Sigma clipping requires at least 8 images to provide minimally reliable results; \
             consider using percentile clipping",
        ),
        RejectionMethod::SigmaClip if n > 15 => unsuitable(
            "Winsorized sigma clipping will work better than sigma clipping for sets of 15 or more images",
        ),
        RejectionMethod::WinsorizedSigmaClip if n < 8 => unsuitable(
            "Winsorized sigma clipping requires at least 8 images to provide minimally reliable \
             results; consider using percentile clipping",
        ),
        RejectionMethod::AveragedSigmaClip if n < 8 => unsuitable(
            "Averaged sigma clipping requires at least 8 images to provide minimally reliable \
             results; consider using percentile clipping",
        ),
        RejectionMethod::AveragedSigmaClip if n > 10 => unsuitable(
            "Sigma clipping or Winsorized sigma clipping will work better than averaged sigma \
             clipping for sets of 10 or more images",
        ),
        RejectionMethod::LinearFit if n < 8 => unsuitable(
            "Linear fit clipping requires at least 15 images to provide reliable results; \
             consider using percentile clipping",
        ),
        RejectionMethod::LinearFit if n < 20 => RejectionVerdict::Suboptimal(
            "Linear fit clipping may not be optimal: it may not be better than Winsorized sigma \
             clipping for sets of less than 15-20 images"
                .to_string(),
        ),
        _ => RejectionVerdict::Good,
    }
}
