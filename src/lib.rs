//! Small feed-forward and convolutional networks trained from scratch on MNIST, plus a scalar
//! x -> x^2 regression demo.
//!
//! A run is a [`session::TrainingSession`] owning a [`network::Network`], an
//! [`optimizer::Optimizer`] and a [`loss::Loss`], fed by any [`dataset::DatasetProvider`].

pub mod config;
pub mod dataset;
pub mod error;
pub mod layers;
pub mod loss;
pub mod loss_history;
pub mod mnist;
pub mod models;
pub mod network;
pub mod optimizer;
pub mod regression;
pub mod session;

pub use error::{Error, Result};
