//! Generalized linear model fitting for negative binomial counts

mod design;
mod fitting;
pub(crate) mod linalg;
mod negative_binomial;

pub use design::{TwoGroupDesign, INTERCEPT};
pub use fitting::{fit_glm, fit_single_gene, refit_glm, GlmFitParams, GlmFitResult};
pub use negative_binomial::{
    nb_deviance, nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_ETA, MAX_LFC_BETA, MIN_MU, RIDGE,
};
