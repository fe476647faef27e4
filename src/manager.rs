use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::Error;
use crate::eval::DebuggerHost;
use crate::storage::TypeVizStorage;

/// Produces the in-memory visualizer set of one `.natvis` file; the XML
/// parsing itself lives with the embedder.
pub trait VizFileLoader {
    fn load(&self, filepath: &str) -> Result<LoadedVisualizers, Error>;
}

pub struct LoadedVisualizers {
    pub visualizers: Vec<Rc<crate::schema::viz::TypeViz>>,
    /// Content fingerprint used to skip no-op reloads.
    pub fingerprint: u64,
}

pub struct FormatterEntry {
    pub storage: TypeVizStorage,
    fingerprint: u64,
    loader: Rc<dyn VizFileLoader>,
}

/// Registry of loaded visualizer files. Every structural change re-runs
/// the top-level method synthesis and re-registers the declarations with
/// the host.
#[derive(Default)]
pub struct FormattersManager {
    entries: BTreeMap<String, FormatterEntry>,
}

fn build_storage(loaded: &LoadedVisualizers) -> TypeVizStorage {
    let mut storage = TypeVizStorage::new();
    for visualizer in &loaded.visualizers {
        storage.add_type(Rc::clone(visualizer));
    }
    storage.generate_top_level_methods();
    storage
}

impl FormattersManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        filepath: &str,
        loader: Rc<dyn VizFileLoader>,
    ) -> Result<(), Error> {
        let loaded = loader.load(filepath)?;
        let entry = FormatterEntry {
            storage: build_storage(&loaded),
            fingerprint: loaded.fingerprint,
            loader,
        };
        self.entries.insert(filepath.to_string(), entry);
        Ok(())
    }

    pub fn unregister(&mut self, filepath: &str) -> bool {
        self.entries.remove(filepath).is_some()
    }

    pub fn reload(&mut self, filepath: &str) -> Result<(), Error> {
        let Some(entry) = self.entries.get(filepath) else {
            return Err(Error::Loader(format!("file '{filepath}' is not registered")));
        };
        let loader = Rc::clone(&entry.loader);
        let loaded = loader.load(filepath)?;
        if loaded.fingerprint == entry.fingerprint {
            debug!("Reload of '{filepath}' skipped: contents unchanged");
            return Ok(());
        }
        let entry = FormatterEntry {
            storage: build_storage(&loaded),
            fingerprint: loaded.fingerprint,
            loader,
        };
        self.entries.insert(filepath.to_string(), entry);
        Ok(())
    }

    #[must_use]
    pub fn all_registered_files(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn all_storages_mut(&mut self) -> impl Iterator<Item = &mut TypeVizStorage> {
        self.entries.values_mut().map(|entry| &mut entry.storage)
    }

    /// Drop and re-add every top-level declaration of every registered
    /// file, by name or by regex as each definition asks.
    pub fn emit_all_top_level_declarations(&mut self, host: &dyn DebuggerHost) {
        host.remove_all_top_level_declarations();
        for entry in self.entries.values() {
            for definition in entry.storage.top_level_methods() {
                let result = if definition.name_uses_regex {
                    host.add_top_level_declaration_by_regex(&definition.full_name, &definition.body)
                } else {
                    host.add_top_level_declaration(&definition.full_name, &definition.body)
                };
                if let Err(err) = result {
                    debug!(
                        "Can't add lazy declarations for '{}': {err}",
                        definition.full_name
                    );
                }
            }
        }
    }
}
