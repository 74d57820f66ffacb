//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use marketplace_core::reducer::Reducer;
use std::fmt::Debug;

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<F> = Box<dyn FnOnce(&[F])>;

/// Type alias for error assertion functions
type ErrorAssertion<E> = Box<dyn FnOnce(&E)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// A test expects success unless [`ReducerTest::then_error`] is used, in
/// which case it expects rejection and also checks the state was left
/// exactly as given.
///
/// # Example
///
/// ```ignore
/// use marketplace_testing::ReducerTest;
///
/// ReducerTest::new(BookingReducer)
///     .with_env(test_environment())
///     .given_state(requested_booking())
///     .when_action(BookingAction::Accept { actor })
///     .then_state(|booking| {
///         assert_eq!(booking.status, BookingStatus::Accepted);
///     })
///     .then_effects(|effects| {
///         assert_eq!(effects.len(), 1);
///     })
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    action: Option<R::Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    effect_assertions: Vec<EffectAssertion<R::Effect>>,
    error_assertion: Option<ErrorAssertion<R::Error>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone + PartialEq + Debug,
    R::Effect: Debug,
    R::Error: Debug,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
            error_assertion: None,
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[R::Effect]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the action to be rejected (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Error) + 'static,
    {
        self.error_assertion = Some(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set, if the
    /// outcome (success or rejection) differs from what was expected, or if
    /// any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let action = self.action.expect("Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let before = state.clone();

        // Execute reducer
        let outcome = self.reducer.reduce(&mut state, action, &env);

        match (outcome, self.error_assertion) {
            (Ok(effects), None) => {
                for assertion in self.effect_assertions {
                    assertion(&effects);
                }
            }
            (Ok(effects), Some(_)) => {
                panic!("Expected the action to be rejected, but it succeeded with {effects:?}");
            }
            (Err(error), None) => {
                panic!("Expected the action to succeed, but it was rejected: {error:?}");
            }
            (Err(error), Some(assertion)) => {
                assert_eq!(state, before, "Rejected action must leave state unchanged");
                assertion(&error);
            }
        }

        // Run state assertions
        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use marketplace_core::effect::{MarketEffect, NotificationKind};

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects(effects: &[MarketEffect]) {
        assert!(
            effects.is_empty(),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count(effects: &[MarketEffect], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}: {:?}",
            expected,
            effects.len(),
            effects
        );
    }

    /// Assert that effects contain a processor charge
    ///
    /// # Panics
    ///
    /// Panics if no `Charge` effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_charge(effects: &[MarketEffect]) {
        assert!(
            effects.iter().any(|e| matches!(e, MarketEffect::Charge { .. })),
            "Expected a Charge effect, found {effects:?}"
        );
    }

    /// Assert that effects contain a refund
    ///
    /// # Panics
    ///
    /// Panics if no `Refund` effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_refund(effects: &[MarketEffect]) {
        assert!(
            effects.iter().any(|e| matches!(e, MarketEffect::Refund { .. })),
            "Expected a Refund effect, found {effects:?}"
        );
    }

    /// Assert that effects contain an earnings transfer
    ///
    /// # Panics
    ///
    /// Panics if no `TransferEarnings` effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_transfer(effects: &[MarketEffect]) {
        assert!(
            effects
                .iter()
                .any(|e| matches!(e, MarketEffect::TransferEarnings { .. })),
            "Expected a TransferEarnings effect, found {effects:?}"
        );
    }

    /// Assert that effects contain a notification of the given kind
    ///
    /// # Panics
    ///
    /// Panics if no matching `Notify` effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_notifies(effects: &[MarketEffect], kind: NotificationKind) {
        assert!(
            effects
                .iter()
                .any(|e| matches!(e, MarketEffect::Notify(n) if n.kind == kind)),
            "Expected a {kind:?} notification, found {effects:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::SmallVec;

    #[derive(Clone, Debug, PartialEq)]
    struct TestState {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;
        type Effect = i32;
        type Error = String;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> Result<SmallVec<[i32; 4]>, String> {
            match action {
                TestAction::Increment => {
                    state.count += 1;
                    Ok(smallvec::smallvec![state.count])
                }
                TestAction::Decrement if state.count == 0 => Err("already zero".to_string()),
                TestAction::Decrement => {
                    state.count -= 1;
                    Ok(SmallVec::new())
                }
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Increment)
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .then_effects(|effects| {
                assert_eq!(effects, &[1]);
            })
            .run();
    }

    #[test]
    fn test_reducer_test_rejection() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Decrement)
            .then_error(|error| {
                assert_eq!(error, "already zero");
            })
            .then_state(|state| {
                assert_eq!(state.count, 0);
            })
            .run();
    }

    #[test]
    #[should_panic(expected = "Expected the action to succeed")]
    fn test_unexpected_rejection_panics() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Decrement)
            .run();
    }
}
