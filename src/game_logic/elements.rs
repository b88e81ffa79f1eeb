use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

/// One versioned unit of the shared drawing surface. Everything apart from
/// the identity and version fields is carried through untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DrawingElement {
    pub id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub version_nonce: i64,
    #[serde(flatten)]
    pub payload: JsonMap<String, JsonValue>,
}

impl DrawingElement {
    /// Whether this element should replace `stored` under last-writer-wins.
    fn supersedes(&self, stored: &DrawingElement) -> bool {
        (self.version, self.version_nonce) > (stored.version, stored.version_nonce)
    }
}

/// The board of one room. Insertion order is kept because clients stack
/// elements in the order they are listed.
#[derive(Debug, Clone)]
pub struct ElementStore {
    elements: Vec<DrawingElement>,
    index: HashMap<String, usize>,
    max_elements: usize,
}

impl ElementStore {
    pub fn new(max_elements: usize) -> Self {
        Self {
            elements: Vec::new(),
            index: HashMap::new(),
            max_elements,
        }
    }

    /// Applies edits authored by the current drawer. Returns the elements
    /// that were accepted, which are the only ones worth relaying.
    pub fn apply_local_change(&mut self, incoming: Vec<DrawingElement>) -> Vec<DrawingElement> {
        let accepted = self.merge(incoming);
        self.enforce_limit();
        accepted
    }

    /// Reconciles a complete scene pushed by a client that may have been
    /// offline. Elements already known at an equal or newer version are
    /// skipped, so replaying an old scene is harmless.
    pub fn apply_remote_merge(&mut self, scene: Vec<DrawingElement>) -> Vec<DrawingElement> {
        let mut latest: HashMap<String, DrawingElement> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for element in scene {
            let keep = match latest.get(&element.id) {
                Some(existing) => element.supersedes(existing),
                None => {
                    order.push(element.id.clone());
                    true
                }
            };
            if keep {
                latest.insert(element.id.clone(), element);
            }
        }
        let deduplicated = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect();
        let accepted = self.merge(deduplicated);
        self.enforce_limit();
        accepted
    }

    /// Wipes every element together with its version bookkeeping.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.index.clear();
    }

    pub fn snapshot(&self) -> Vec<DrawingElement> {
        self.elements.clone()
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&DrawingElement> {
        self.index.get(id).map(|&slot| &self.elements[slot])
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn merge(&mut self, incoming: Vec<DrawingElement>) -> Vec<DrawingElement> {
        let mut accepted = Vec::new();
        for element in incoming {
            if element.id.is_empty() {
                continue;
            }
            match self.index.get(&element.id) {
                Some(&slot) => {
                    if element.supersedes(&self.elements[slot]) {
                        self.elements[slot] = element.clone();
                        accepted.push(element);
                    }
                }
                None => {
                    self.index.insert(element.id.clone(), self.elements.len());
                    self.elements.push(element.clone());
                    accepted.push(element);
                }
            }
        }
        accepted
    }

    fn enforce_limit(&mut self) {
        if self.elements.len() <= self.max_elements {
            return;
        }
        let overflow = self.elements.len() - self.max_elements;
        self.elements.drain(..overflow);
        self.index = self
            .elements
            .iter()
            .enumerate()
            .map(|(slot, element)| (element.id.clone(), slot))
            .collect();
    }
}
