//! Real-time conversation sync layer for a customer-support dashboard.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(unsafe_code)] // Le code unsafe est interdit
#![warn(missing_docs)] // Toute fonction, struct, enum ou module public doit être documenté
#![warn(dead_code)] // Le code inutilisé est signalé
#![deny(non_camel_case_types)]
// Les types doivent suivre la convention CamelCase

// Options supplémentaires pour ne rien laisser passer
#![warn(unused_imports)] // Les imports inutilisés sont signalés
#![warn(unused_variables)] // Les variables inutilisées sont signalées
#![deny(unused_must_use)] // Oblige à gérer explicitement les Result et Option
#![deny(non_snake_case)] // Les noms de variables et fonctions doivent être en snake_case
#![deny(non_upper_case_globals)] // Les constantes et globals doivent être en MAJUSCULE
#![deny(nonstandard_style)] // Empêche tout style de code non standard
#![forbid(unsafe_op_in_unsafe_fn)]

// Clippy pour stricte discipline
#![deny(clippy::all)] // Active toutes les lints Clippy standard
#![deny(clippy::pedantic)] // Active les lints très strictes de Clippy
#![deny(clippy::nursery)] // Active les lints expérimentales
#![deny(clippy::unwrap_used)] // Interdit unwrap()
#![deny(clippy::expect_used)] // Interdit expect()
#![deny(clippy::print_stdout)] // Interdit println!() en production
#![deny(clippy::todo)] // Interdit les TODO dans le code
#![deny(clippy::unimplemented)] // Interdit les fonctions non implémentées
#![deny(clippy::unwrap_in_result)] // Interdit unwrap() sur Result
#![deny(clippy::redundant_clone)] // Interdit les clones inutiles
#![deny(clippy::cognitive_complexity)] // Limite la complexité cognitive des fonctions
#![allow(clippy::module_name_repetitions)]

// Lints pour sécurité et robustesse
#![deny(overflowing_literals)] // Interdit les littéraux qui débordent

/// Configuration, errors and identifiers.
pub mod core;
/// Conversations, messages and account payloads.
pub mod model;
/// REST client, auth session and wire shapes.
pub mod api;
/// Push channels, subscription registry and typing indicators.
pub mod realtime;
/// Inbox conversation list.
pub mod inbox;
/// Open thread: cache, reducer, grouping and the chat session.
pub mod chat;
/// Periodic background refresh.
pub mod refresh;
/// Pane navigation.
pub mod view;
/// Login, onboarding and widget surfaces.
pub mod account;
/// Application wiring and lifecycle.
pub mod app;
/// Mock backend and its HTTP routes.
#[allow(
    clippy::missing_errors_doc,
    clippy::unused_async,
    clippy::cast_possible_truncation,
    clippy::needless_pass_by_value
)]
pub mod server;
/// Entry helpers for the binaries.
pub mod start;

#[cfg(test)]
mod testing;

pub use app::HelpdeskApp;
pub use crate::core::{SyncConfig, SyncError, SyncResult};
