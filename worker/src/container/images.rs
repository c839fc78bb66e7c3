use std::collections::{HashMap, VecDeque};

/// Pins an untagged image reference to `:latest`.
pub fn normalize_image(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') || last.contains('@') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

/// Reference counts of the images the node pulled, plus the queue of images nothing
/// uses any more, oldest first.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    counts: HashMap<String, usize>,
    removable: VecDeque<String>,
}

impl ImageRegistry {
    /// Registers a freshly pulled image with no references.
    pub fn track(&mut self, image: &str) {
        self.counts.entry(image.to_string()).or_default();
    }

    /// Adds a reference to a tracked image.
    ///
    /// Images the node did not pull itself stay untracked, so they are never collected.
    pub fn acquire(&mut self, image: &str) {
        if let Some(count) = self.counts.get_mut(image) {
            *count += 1;
        }
    }

    /// Drops one reference, queueing the image when the count reaches zero.
    ///
    /// Releasing an image with no references is a no-op.
    ///
    /// # Returns
    /// Whether the image was queued for removal.
    pub fn release(&mut self, image: &str) -> bool {
        let Some(count) = self.counts.get_mut(image) else {
            return false;
        };
        if *count == 0 {
            return false;
        }

        *count -= 1;
        if *count == 0 {
            self.removable.push_back(image.to_string());
            return true;
        }
        false
    }

    /// Queues a tracked image that was pulled but never ended up referenced.
    pub fn abandon(&mut self, image: &str) {
        if self.counts.get(image) == Some(&0) && !self.removable.iter().any(|i| i == image) {
            self.removable.push_back(image.to_string());
        }
    }

    pub fn count(&self, image: &str) -> Option<usize> {
        self.counts.get(image).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Distinct images on disk once `incoming` is pulled.
    pub fn occupancy(&self, incoming: Option<&str>) -> usize {
        let extra = incoming.is_some_and(|image| !self.counts.contains_key(image));
        self.counts.len() + usize::from(extra)
    }

    /// Dequeues the oldest image that is still unreferenced and forgets it.
    ///
    /// Queued images that were acquired again are skipped; they are queued anew on
    /// their next release.
    pub fn take_removable(&mut self) -> Option<String> {
        while let Some(image) = self.removable.pop_front() {
            if self.counts.get(&image) == Some(&0) {
                self.counts.remove(&image);
                return Some(image);
            }
        }
        None
    }

    /// Puts back an image whose physical removal failed.
    pub fn restore(&mut self, image: String) {
        if !self.counts.contains_key(&image) {
            self.counts.insert(image.clone(), 0);
            self.removable.push_front(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_images_get_latest() {
        assert_eq!(normalize_image("gkswjdzz/gpt-2"), "gkswjdzz/gpt-2:latest");
        assert_eq!(normalize_image("gkswjdzz/gpt-2:v1"), "gkswjdzz/gpt-2:v1");
        assert_eq!(normalize_image("localhost:5000/trainer"), "localhost:5000/trainer:latest");
        assert_eq!(normalize_image("repo/img@sha256:abc"), "repo/img@sha256:abc");
    }

    #[test]
    fn release_saturates_and_queues_once_at_zero() {
        let mut images = ImageRegistry::default();
        images.track("a:1");
        images.acquire("a:1");
        images.acquire("a:1");

        assert!(!images.release("a:1"));
        assert!(images.release("a:1"));
        assert!(!images.release("a:1"));
        assert_eq!(images.count("a:1"), Some(0));
        assert!(!images.release("unknown:1"));
    }

    #[test]
    fn reacquired_images_are_skipped_by_removal() {
        let mut images = ImageRegistry::default();
        images.track("a:1");
        images.track("b:1");
        images.acquire("a:1");
        images.acquire("b:1");
        images.release("a:1");
        images.release("b:1");
        images.acquire("a:1");

        assert_eq!(images.take_removable().as_deref(), Some("b:1"));
        assert_eq!(images.take_removable(), None);
        assert_eq!(images.count("a:1"), Some(1));
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn untracked_images_are_never_counted() {
        let mut images = ImageRegistry::default();
        images.acquire("host:1");

        assert_eq!(images.count("host:1"), None);
        assert!(!images.release("host:1"));
        assert_eq!(images.take_removable(), None);
        assert!(images.is_empty());
    }

    #[test]
    fn occupancy_counts_a_new_image_once() {
        let mut images = ImageRegistry::default();
        images.track("a:1");

        assert_eq!(images.occupancy(None), 1);
        assert_eq!(images.occupancy(Some("a:1")), 1);
        assert_eq!(images.occupancy(Some("b:1")), 2);
    }

    #[test]
    fn failed_removals_go_back_to_the_front() {
        let mut images = ImageRegistry::default();
        for image in ["a:1", "b:1"] {
            images.track(image);
            images.acquire(image);
            images.release(image);
        }

        let first = images.take_removable().unwrap();
        images.restore(first.clone());
        assert_eq!(images.take_removable(), Some(first));
    }
}
