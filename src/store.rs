use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::RwLock;
use thiserror::Error;

/// Parameter identity, shared between the host-facing parameter declaration
/// and the persisted state tree. Parameters are looked up by key, never by
/// position, so adding a second parameter does not invalidate saved state.
pub const GAIN_ID: &str = "gain";
pub const GAIN_NAME: &str = "Gain";

/// Gain range in decibels, matching a typical DAW channel fader.
pub const GAIN_MIN_DB: f32 = -48.0;
pub const GAIN_MAX_DB: f32 = 0.0;
pub const GAIN_DEFAULT_DB: f32 = -15.0;

/// Root tag of the persisted state tree. A blob whose root carries a
/// different tag was written by something else and must not be applied.
pub const STATE_ROOT_TAG: &str = "savedParams";

/// A snapshot of all persisted parameter values, keyed by parameter ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedParams(pub BTreeMap<String, f32>);

/// Why a state blob could not be loaded. Either way the store keeps its
/// previous values.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("malformed state blob: {0}")]
    Malformed(String),
    #[error("state root tag mismatch: expected `savedParams`, found `{0}`")]
    TagMismatch(String),
}

pub type GainListener = Box<dyn Fn(f32) + Send + Sync>;

/// Owns the gain parameter value shared between the control context and the
/// audio thread, plus the listener bindings a control surface hooks into.
///
/// Reads and writes go through an atomic cell, so the audio thread's
/// per-block [`gain_db`](Self::gain_db) never blocks on a control-side
/// write.
pub struct GainParamStore {
    gain_db: AtomicF32,
    listeners: RwLock<Vec<GainListener>>,
}

impl Default for GainParamStore {
    fn default() -> Self {
        Self {
            gain_db: AtomicF32::new(GAIN_DEFAULT_DB),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl GainParamStore {
    /// The current gain in decibels. Safe to call from the audio thread
    /// concurrently with control-side writes.
    pub fn gain_db(&self) -> f32 {
        self.gain_db.load(Ordering::Acquire)
    }

    /// Clamps to the parameter range, stores, then synchronously notifies
    /// listeners with the clamped value. The parameter change callback may
    /// run this on the audio thread, so the listener pass must not allocate.
    pub fn set(&self, db: f32) {
        // A non-finite value would slip through the clamp.
        if !db.is_finite() {
            return;
        }

        let db = db.clamp(GAIN_MIN_DB, GAIN_MAX_DB);
        self.gain_db.store(db, Ordering::Release);

        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener(db);
            }
        }
    }

    /// Registers a change listener so a bound control stays in sync with
    /// host-driven automation. Control context only.
    pub fn subscribe(&self, listener: GainListener) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// The current values as a persisted-state tree.
    pub fn snapshot(&self) -> SavedParams {
        let mut values = BTreeMap::new();
        values.insert(GAIN_ID.to_string(), self.gain_db());
        SavedParams(values)
    }

    /// Applies a snapshot, clamping each value. Unknown keys are skipped so
    /// state written by a build with more parameters still loads.
    pub fn apply(&self, snapshot: &SavedParams) {
        if let Some(&db) = snapshot.0.get(GAIN_ID) {
            self.set(db);
        }
    }

    /// Exports the state tree, rooted at [`STATE_ROOT_TAG`], as an opaque
    /// binary blob. Control context only; may allocate.
    pub fn serialize(&self) -> Vec<u8> {
        // A tree of plain finite floats always serializes.
        let values = serde_json::to_value(self.snapshot()).unwrap_or_default();
        let mut root = serde_json::Map::new();
        root.insert(STATE_ROOT_TAG.to_owned(), values);
        serde_json::to_vec(&serde_json::Value::Object(root)).unwrap_or_default()
    }

    /// Parses and validates the whole blob before anything is applied, so a
    /// failed load leaves the store exactly as it was.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<(), StateError> {
        let root: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|err| StateError::Malformed(err.to_string()))?;

        let serde_json::Value::Object(tree) = root else {
            return Err(StateError::Malformed(
                "expected a single-keyed root object".to_owned(),
            ));
        };
        let mut entries = tree.into_iter();
        let (tag, values) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(StateError::Malformed(
                    "expected a single-keyed root object".to_owned(),
                ))
            }
        };
        if tag != STATE_ROOT_TAG {
            return Err(StateError::TagMismatch(tag));
        }

        let snapshot: SavedParams =
            serde_json::from_value(values).map_err(|err| StateError::Malformed(err.to_string()))?;
        self.apply(&snapshot);
        Ok(())
    }
}

/// Lets the `savedParams` tree ride the host's save/restore blob as a
/// persistent field on the `Params` struct.
impl<'a> nih_plug::params::persist::PersistentField<'a, SavedParams> for GainParamStore {
    fn set(&self, new_value: SavedParams) {
        self.apply(&new_value);
    }

    fn map<F, R>(&self, f: F) -> R
    where
        F: Fn(&SavedParams) -> R,
    {
        f(&self.snapshot())
    }
}

/// Forwarding impl so the store can sit behind an `Arc` on the `Params`
/// struct; nih-plug only provides `Arc` impls for its own wrapper types.
impl<'a> nih_plug::params::persist::PersistentField<'a, SavedParams> for std::sync::Arc<GainParamStore> {
    fn set(&self, new_value: SavedParams) {
        nih_plug::params::persist::PersistentField::set(self.as_ref(), new_value);
    }

    fn map<F, R>(&self, f: F) -> R
    where
        F: Fn(&SavedParams) -> R,
    {
        nih_plug::params::persist::PersistentField::map(self.as_ref(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn defaults_to_minus_fifteen_db() {
        let store = GainParamStore::default();
        assert_eq!(store.gain_db(), GAIN_DEFAULT_DB);
    }

    #[test]
    fn set_then_get_roundtrips_in_range() {
        let store = GainParamStore::default();
        for db in [-48.0, -37.2, -15.0, -3.5, 0.0] {
            store.set(db);
            assert_eq!(store.gain_db(), db, "expected {db}, got {}", store.gain_db());
        }
    }

    #[test]
    fn out_of_range_values_clamp_to_the_nearest_bound() {
        let store = GainParamStore::default();

        store.set(-96.0);
        assert_eq!(store.gain_db(), GAIN_MIN_DB, "should clamp to min");

        store.set(6.0);
        assert_eq!(store.gain_db(), GAIN_MAX_DB, "should clamp to max");
    }

    #[test]
    fn non_finite_writes_are_dropped() {
        let store = GainParamStore::default();
        store.set(f32::NAN);
        store.set(f32::INFINITY);
        assert_eq!(store.gain_db(), GAIN_DEFAULT_DB);
    }

    #[test]
    fn listeners_receive_the_clamped_value() {
        let store = GainParamStore::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(Box::new(move |db| sink.lock().unwrap().push(db)));

        store.set(-6.0);
        store.set(-96.0);

        assert_eq!(*seen.lock().unwrap(), vec![-6.0, GAIN_MIN_DB]);
    }

    #[test]
    fn serialize_deserialize_restores_the_exact_value() {
        let store = GainParamStore::default();
        store.set(-3.5);
        let blob = store.serialize();

        store.set(-20.0);
        store.deserialize(&blob).unwrap();
        assert_eq!(store.gain_db(), -3.5);
    }

    #[test]
    fn corrupted_blob_leaves_the_store_unchanged() {
        let store = GainParamStore::default();
        store.set(-9.0);

        let result = store.deserialize(b"definitely not a state tree");
        assert!(matches!(result, Err(StateError::Malformed(_))));
        assert_eq!(store.gain_db(), -9.0);
    }

    #[test]
    fn wrong_root_tag_is_a_noop() {
        let store = GainParamStore::default();
        store.set(-9.0);

        let blob = serde_json::to_vec(&serde_json::json!({ "wrongTag": { "gain": -3.0 } })).unwrap();
        let result = store.deserialize(&blob);
        assert!(matches!(result, Err(StateError::TagMismatch(tag)) if tag == "wrongTag"));
        assert_eq!(store.gain_db(), -9.0);
    }

    #[test]
    fn non_object_root_is_malformed() {
        let store = GainParamStore::default();
        let blob = serde_json::to_vec(&serde_json::json!([1, 2, 3])).unwrap();
        assert!(matches!(
            store.deserialize(&blob),
            Err(StateError::Malformed(_))
        ));
    }

    #[test]
    fn garbage_values_under_a_valid_tag_are_malformed() {
        let store = GainParamStore::default();
        store.set(-9.0);

        let blob =
            serde_json::to_vec(&serde_json::json!({ "savedParams": { "gain": "loud" } })).unwrap();
        assert!(matches!(
            store.deserialize(&blob),
            Err(StateError::Malformed(_))
        ));
        assert_eq!(store.gain_db(), -9.0);
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let store = GainParamStore::default();
        let blob = serde_json::to_vec(
            &serde_json::json!({ "savedParams": { "gain": -6.0, "width": 0.5 } }),
        )
        .unwrap();

        store.deserialize(&blob).unwrap();
        assert_eq!(store.gain_db(), -6.0);
    }

    #[test]
    fn persisted_out_of_range_values_are_clamped_on_load() {
        let store = GainParamStore::default();
        let blob =
            serde_json::to_vec(&serde_json::json!({ "savedParams": { "gain": -90.0 } })).unwrap();

        store.deserialize(&blob).unwrap();
        assert_eq!(store.gain_db(), GAIN_MIN_DB);
    }

    #[test]
    fn host_state_path_roundtrips() {
        use nih_plug::params::persist::PersistentField;

        let saved = GainParamStore::default();
        saved.set(-12.25);
        let tree = saved.map(|snapshot: &SavedParams| snapshot.clone());

        let restored = GainParamStore::default();
        PersistentField::set(&restored, tree);
        assert_eq!(restored.gain_db(), -12.25);
    }
}
