//! Tag snapshot: the spool identity frozen when a session opens.
//!
//! The inventory record is the canonical source when the tag is catalogued;
//! otherwise fields come from the raw tag data one by one. Absent fields are
//! stored as empty strings or zero so nothing downstream sees a null.

use crate::device::{SpoolCatalog, TagSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Subtype placeholder some tags carry instead of leaving the field blank.
pub const UNKNOWN_SUBTYPE: &str = "Unknown";

/// A catalogued spool as returned by the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolRecord {
    pub id: String,
    #[serde(default)]
    pub tag_id: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub color_name: String,
    #[serde(default)]
    pub color_rgba: u32,
    #[serde(default)]
    pub label_weight: u32,
    #[serde(default)]
    pub slicer_filament: String,
    #[serde(default)]
    pub tag_type: String,
}

impl SpoolRecord {
    /// A record without a spool id cannot be assigned or calibrated.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Fields decoded from the physical tag. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFields {
    pub vendor: Option<String>,
    pub material: Option<String>,
    pub subtype: Option<String>,
    pub color_name: Option<String>,
    pub color_rgba: Option<u32>,
    pub spool_weight: Option<u32>,
    pub slicer_filament: Option<String>,
    pub tag_type: Option<String>,
}

/// What the reader holds right now: the tag id and its decoded fields,
/// taken from one read of the staging area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedTag {
    pub tag_id: String,
    pub fields: TagFields,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSnapshot {
    pub tag_id: String,
    /// Inventory spool id. Empty unless `in_inventory`.
    pub spool_id: String,
    pub vendor: String,
    pub material: String,
    pub subtype: String,
    pub color_name: String,
    pub color_rgba: u32,
    pub spool_weight: u32,
    pub slicer_filament_name: String,
    pub tag_type: String,
    pub in_inventory: bool,
}

impl TagSnapshot {
    /// The "no tag" snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_id.is_empty()
    }

    /// Whether this snapshot carries everything an assignment needs.
    pub fn is_assignable(&self) -> bool {
        !self.is_empty() && self.in_inventory && !self.spool_id.is_empty()
    }

    /// Subtype, unless it is blank or the placeholder.
    pub fn meaningful_subtype(&self) -> Option<&str> {
        let subtype = self.subtype.as_str();
        (!subtype.is_empty() && subtype != UNKNOWN_SUBTYPE).then_some(subtype)
    }

    /// Short filament label such as "PLA Basic".
    pub fn filament_label(&self) -> String {
        match (self.material.is_empty(), self.meaningful_subtype()) {
            (false, Some(subtype)) => format!("{} {}", self.material, subtype),
            (false, None) => self.material.clone(),
            (true, _) => UNKNOWN_SUBTYPE.into(),
        }
    }

    fn from_inventory(tag_id: &str, record: SpoolRecord) -> Self {
        Self {
            tag_id: tag_id.to_string(),
            spool_id: record.id,
            vendor: record.brand,
            material: record.material,
            subtype: record.subtype,
            color_name: record.color_name,
            color_rgba: record.color_rgba,
            spool_weight: record.label_weight,
            slicer_filament_name: record.slicer_filament,
            tag_type: record.tag_type,
            in_inventory: true,
        }
    }

    fn from_tag(tag_id: &str, fields: TagFields) -> Self {
        Self {
            tag_id: tag_id.to_string(),
            spool_id: String::new(),
            vendor: fields.vendor.unwrap_or_default(),
            material: fields.material.unwrap_or_default(),
            subtype: fields.subtype.unwrap_or_default(),
            color_name: fields.color_name.unwrap_or_default(),
            color_rgba: fields.color_rgba.unwrap_or_default(),
            spool_weight: fields.spool_weight.unwrap_or_default(),
            slicer_filament_name: fields.slicer_filament.unwrap_or_default(),
            tag_type: fields.tag_type.unwrap_or_default(),
            in_inventory: false,
        }
    }
}

/// Freeze the currently-staged tag into a snapshot.
///
/// Returns [`TagSnapshot::empty`] when nothing is staged or the tag id is
/// blank. Inventory failures degrade to the raw tag path.
pub async fn capture(tags: &dyn TagSource, catalog: &dyn SpoolCatalog) -> TagSnapshot {
    let StagedTag { tag_id, fields } = match tags.staged_tag().await {
        Some(staged) if !staged.tag_id.is_empty() => staged,
        Some(_) => {
            debug!("Staged tag has no id, capturing empty snapshot");
            return TagSnapshot::empty();
        }
        None => {
            debug!("Nothing staged, capturing empty snapshot");
            return TagSnapshot::empty();
        }
    };

    match catalog.lookup_by_tag(&tag_id).await {
        Ok(Some(record)) if record.is_valid() => {
            info!(tag_id = %tag_id, spool_id = %record.id, "Captured snapshot from inventory");
            return TagSnapshot::from_inventory(&tag_id, record);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(tag_id = %tag_id, error = %e, "Inventory lookup failed, using raw tag data");
        }
    }

    let snapshot = TagSnapshot::from_tag(&tag_id, fields);
    info!(
        tag_id = %tag_id,
        vendor = %snapshot.vendor,
        material = %snapshot.material,
        "Captured snapshot from raw tag data"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::KProfile;
    use crate::error::DeviceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTag {
        tag_id: Option<String>,
        staging: bool,
        fields: TagFields,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl TagSource for FixedTag {
        async fn staged_tag(&self) -> Option<StagedTag> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let tag_id = self.tag_id.clone()?;
            self.staging.then(|| StagedTag {
                tag_id,
                fields: self.fields.clone(),
            })
        }
        async fn clear_staging(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    struct FixedCatalog {
        record: Result<Option<SpoolRecord>, DeviceError>,
        lookups: AtomicUsize,
    }

    impl FixedCatalog {
        fn new(record: Result<Option<SpoolRecord>, DeviceError>) -> Self {
            Self {
                record,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpoolCatalog for FixedCatalog {
        async fn lookup_by_tag(&self, _tag_id: &str) -> Result<Option<SpoolRecord>, DeviceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.record.clone()
        }
        async fn calibration_for(
            &self,
            _spool_id: &str,
            _printer_serial: &str,
        ) -> Result<Option<KProfile>, DeviceError> {
            Ok(None)
        }
    }

    fn staged(tag_id: &str, fields: TagFields) -> FixedTag {
        FixedTag {
            tag_id: Some(tag_id.into()),
            staging: true,
            fields,
            reads: AtomicUsize::new(0),
        }
    }

    fn inventory_record() -> SpoolRecord {
        SpoolRecord {
            id: "spool-1".into(),
            tag_id: "04AABB".into(),
            brand: "Bambu".into(),
            material: "PLA".into(),
            subtype: "Matte".into(),
            color_name: "Ivory".into(),
            color_rgba: 0xFFFFF0FF,
            label_weight: 1000,
            slicer_filament: "GFA01".into(),
            tag_type: "bambu".into(),
        }
    }

    #[tokio::test]
    async fn no_staging_gives_empty_snapshot() {
        let tags = FixedTag {
            tag_id: Some("04AABB".into()),
            staging: false,
            fields: TagFields::default(),
            reads: AtomicUsize::new(0),
        };
        let catalog = FixedCatalog::new(Ok(Some(inventory_record())));
        let snap = capture(&tags, &catalog).await;
        assert!(snap.is_empty());
        assert!(!snap.in_inventory);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_tag_id_gives_empty_snapshot() {
        let tags = staged("", TagFields::default());
        let catalog = FixedCatalog::new(Ok(None));
        assert_eq!(capture(&tags, &catalog).await, TagSnapshot::empty());
    }

    #[tokio::test]
    async fn inventory_record_wins_over_tag_data() {
        let tags = staged(
            "04AABB",
            TagFields {
                vendor: Some("Generic".into()),
                material: Some("PETG".into()),
                ..Default::default()
            },
        );
        let catalog = FixedCatalog::new(Ok(Some(inventory_record())));
        let snap = capture(&tags, &catalog).await;
        assert!(snap.in_inventory);
        assert_eq!(snap.spool_id, "spool-1");
        assert_eq!(snap.vendor, "Bambu");
        assert_eq!(snap.material, "PLA");
        assert_eq!(snap.slicer_filament_name, "GFA01");
        assert_eq!(snap.spool_weight, 1000);
        assert!(snap.is_assignable());
    }

    #[tokio::test]
    async fn invalid_inventory_record_falls_back_to_tag() {
        let tags = staged(
            "04AABB",
            TagFields {
                vendor: Some("Generic".into()),
                ..Default::default()
            },
        );
        let record = SpoolRecord {
            id: String::new(),
            ..inventory_record()
        };
        let catalog = FixedCatalog::new(Ok(Some(record)));
        let snap = capture(&tags, &catalog).await;
        assert!(!snap.in_inventory);
        assert!(snap.spool_id.is_empty());
        assert_eq!(snap.vendor, "Generic");
    }

    #[tokio::test]
    async fn missing_tag_fields_become_empty() {
        let tags = staged(
            "04CCDD",
            TagFields {
                material: Some("ABS".into()),
                color_rgba: Some(0xFF0000FF),
                ..Default::default()
            },
        );
        let catalog = FixedCatalog::new(Ok(None));
        let snap = capture(&tags, &catalog).await;
        assert_eq!(snap.tag_id, "04CCDD");
        assert_eq!(snap.material, "ABS");
        assert_eq!(snap.color_rgba, 0xFF0000FF);
        assert_eq!(snap.vendor, "");
        assert_eq!(snap.subtype, "");
        assert_eq!(snap.slicer_filament_name, "");
        assert_eq!(snap.spool_weight, 0);
        assert!(!snap.in_inventory);
        assert!(!snap.is_assignable());
    }

    #[tokio::test]
    async fn staging_area_is_read_once_per_capture() {
        let tags = staged(
            "04CCDD",
            TagFields {
                vendor: Some("Sunlu".into()),
                ..Default::default()
            },
        );
        let catalog = FixedCatalog::new(Ok(None));
        let snap = capture(&tags, &catalog).await;
        assert_eq!(snap.vendor, "Sunlu");
        assert_eq!(tags.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inventory_error_degrades_to_tag_data() {
        let tags = staged(
            "04AABB",
            TagFields {
                vendor: Some("Polymaker".into()),
                ..Default::default()
            },
        );
        let catalog = FixedCatalog::new(Err(DeviceError::Network("refused".into())));
        let snap = capture(&tags, &catalog).await;
        assert_eq!(snap.vendor, "Polymaker");
        assert!(!snap.in_inventory);
    }

    #[test]
    fn filament_label_skips_placeholder_subtype() {
        let mut snap = TagSnapshot {
            material: "PLA".into(),
            subtype: "Basic".into(),
            ..Default::default()
        };
        assert_eq!(snap.filament_label(), "PLA Basic");
        snap.subtype = UNKNOWN_SUBTYPE.into();
        assert_eq!(snap.filament_label(), "PLA");
        snap.material.clear();
        assert_eq!(snap.filament_label(), "Unknown");
    }
}
