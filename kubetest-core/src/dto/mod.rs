//! Data Transfer Objects
//!
//! Serialized forms exchanged between the operator process and the
//! processes running inside the cluster.

pub mod descriptor;
