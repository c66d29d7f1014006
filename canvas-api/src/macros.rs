//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` for a shared handle stored on the state.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<Broadcaster>, broadcaster);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<Broadcaster> {
///     fn from_ref(state: &AppState) -> Self {
///         state.broadcaster.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
