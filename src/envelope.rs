//! Uniform JSON response envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::s3::{BucketDescription, ObjectDescription};
use crate::vsphere::{DatacenterFailure, DatacenterRecord};

/// Request mode reported in the envelope `Name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    ListBuckets,
    BucketInfo,
    VSphereInventory,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ListBuckets => "ListBuckets",
            Mode::BucketInfo => "BucketInfo",
            Mode::VSphereInventory => "VSphereInventory",
        }
    }
}

/// Exactly one of the payload fields is set, matching `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    pub name: Mode,
    /// When the handler started composing the response
    pub date_stamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_list: Option<Vec<BucketDescription>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_list: Option<Vec<ObjectDescription>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenters: Option<Vec<DatacenterRecord>>,
    /// Datacenters that failed while others succeeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DatacenterFailure>,
}

impl ResponseEnvelope {
    fn empty(name: Mode, date_stamp: DateTime<Utc>) -> Self {
        Self {
            name,
            date_stamp,
            bucket_list: None,
            object_list: None,
            datacenters: None,
            errors: Vec::new(),
        }
    }

    pub fn buckets(date_stamp: DateTime<Utc>, buckets: Vec<BucketDescription>) -> Self {
        Self {
            bucket_list: Some(buckets),
            ..Self::empty(Mode::ListBuckets, date_stamp)
        }
    }

    pub fn objects(date_stamp: DateTime<Utc>, objects: Vec<ObjectDescription>) -> Self {
        Self {
            object_list: Some(objects),
            ..Self::empty(Mode::BucketInfo, date_stamp)
        }
    }

    pub fn inventory(
        date_stamp: DateTime<Utc>,
        datacenters: Vec<DatacenterRecord>,
        errors: Vec<DatacenterFailure>,
    ) -> Self {
        Self {
            datacenters: Some(datacenters),
            errors,
            ..Self::empty(Mode::VSphereInventory, date_stamp)
        }
    }
}
