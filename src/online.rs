//! Online/offline tagging contract for trained models kept in a recorder store.
//!
//! Only the contract lives here; stores implement the required methods and get
//! reset and prediction-refresh behavior from the provided ones.

use std::fmt;
use std::str::FromStr;

use log::info;

use crate::error::{Result, TctsError};

/// Tag key under which a recorder stores its online status.
pub const ONLINE_KEY: &str = "online_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnlineTag {
    Online,
    Offline,
}

impl OnlineTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnlineTag::Online => "online",
            OnlineTag::Offline => "offline",
        }
    }
}

impl fmt::Display for OnlineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnlineTag {
    type Err = TctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(OnlineTag::Online),
            "offline" => Ok(OnlineTag::Offline),
            other => Err(TctsError::InvalidConfig(format!("unknown online tag {}", other))),
        }
    }
}

/// How a model's dataset was built; decides how much history a prediction refresh needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Sliding windows of `step_len` rows.
    Windowed { step_len: usize },
    Flat,
}

impl DatasetKind {
    pub fn hist_ref(&self) -> usize {
        match self {
            DatasetKind::Windowed { step_len } => *step_len,
            DatasetKind::Flat => 0,
        }
    }
}

pub trait OnlineTool {
    /// Recorder identifier.
    type Id: Clone + fmt::Debug;
    /// Prediction cutoff, `None` meaning the latest available time.
    type Time: Clone + fmt::Debug;

    fn set_online_tag(&mut self, tag: OnlineTag, ids: &[Self::Id]) -> Result<()>;

    /// Untagged recorders read as offline.
    fn get_online_tag(&self, id: &Self::Id) -> Result<OnlineTag>;

    /// Every recorder of the experiment.
    fn list_models(&self) -> Result<Vec<Self::Id>>;

    fn dataset_kind(&self, id: &Self::Id) -> Result<DatasetKind>;

    /// Re-run predictions of one model up to `to_date`, reaching `hist_ref` rows back.
    fn update_pred(&mut self, id: &Self::Id, to_date: Option<&Self::Time>, hist_ref: usize) -> Result<()>;

    /// Take every model offline, then bring `ids` online.
    fn reset_online_tag(&mut self, ids: &[Self::Id]) -> Result<()> {
        let all = self.list_models()?;
        self.set_online_tag(OnlineTag::Offline, &all)?;
        self.set_online_tag(OnlineTag::Online, ids)?;
        info!("reset online models: {} offline, {} online", all.len(), ids.len());
        Ok(())
    }

    fn online_models(&self) -> Result<Vec<Self::Id>> {
        let mut online = Vec::new();
        for id in self.list_models()? {
            if self.get_online_tag(&id)? == OnlineTag::Online {
                online.push(id);
            }
        }
        Ok(online)
    }

    fn update_online_pred(&mut self, to_date: Option<&Self::Time>) -> Result<usize> {
        let online = self.online_models()?;
        for id in &online {
            let hist_ref = self.dataset_kind(id)?.hist_ref();
            self.update_pred(id, to_date, hist_ref)?;
        }
        info!("finished updating {} online model predictions", online.len());
        Ok(online.len())
    }
}
