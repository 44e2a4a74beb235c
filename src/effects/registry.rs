use std::collections::HashMap;

use image::RgbaImage;

use crate::effects;
use crate::error::{ProcessingError, Result};
use crate::processor::PixelMapper;

type EffectFactory = Box<dyn Fn() -> PixelMapper>;

/// Registry of named pixel effects
///
/// Effects are registered by name and instantiated as boxed mappers, ready
/// to be passed to `map_pixels`.
pub struct EffectRegistry {
    effects: HashMap<String, EffectFactory>,
}

impl EffectRegistry {
    /// Create a registry holding all built-in effects
    pub fn new() -> Self {
        let mut registry = Self {
            effects: HashMap::new(),
        };
        registry.register_builtin_effects();
        registry
    }

    fn register_builtin_effects(&mut self) {
        let builtins: [(&str, fn(RgbaImage) -> RgbaImage); 6] = [
            ("grayscale", effects::grayscale),
            ("invert", effects::invert),
            ("flip-h", effects::flip_horizontal),
            ("flip-v", effects::flip_vertical),
            ("rotate180", effects::rotate180),
            ("scanlines", effects::scanlines),
        ];

        for (name, effect) in builtins {
            self.effects
                .insert(name.to_string(), Box::new(move || -> PixelMapper { Box::new(effect) }));
        }
    }

    /// Register a custom effect
    ///
    /// # Arguments
    ///
    /// * `name` - Unique name for the effect; replaces any effect of that name
    /// * `factory` - Function that creates new instances of the mapper
    pub fn register<F>(&mut self, name: String, factory: F)
    where
        F: Fn() -> PixelMapper + 'static,
    {
        self.effects.insert(name.to_lowercase(), Box::new(factory));
    }

    /// Get an effect by name (case-insensitive)
    pub fn get_effect(&self, name: &str) -> Option<PixelMapper> {
        self.effects.get(&name.to_lowercase()).map(|factory| factory())
    }

    /// Resolve a list of names, failing on the first unknown one
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PixelMapper>> {
        names
            .iter()
            .map(|name| {
                self.get_effect(name.as_ref()).ok_or_else(|| {
                    ProcessingError::UnknownEffect {
                        name: name.as_ref().to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }

    /// All effect names, sorted
    pub fn available_effects(&self) -> Vec<String> {
        let mut names: Vec<String> = self.effects.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_effect(&self, name: &str) -> bool {
        self.effects.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
