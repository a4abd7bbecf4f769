use serde::{Deserialize, Serialize};

/// A player-controlled participant of an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combatant {
    guid: String,
    job_name: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCombatant {
    #[serde(rename = "_GUID")]
    pub guid: String,
    #[serde(rename = "_jobName", skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(rename = "_name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Combatant {
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            job_name: None,
            name: None,
        }
    }

    pub fn with_name(guid: impl Into<String>, name: impl Into<String>) -> Self {
        let mut combatant = Self::new(guid);
        combatant.set_name(name);
        combatant
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !name.trim().is_empty() {
            self.name = Some(name);
        }
    }

    pub fn set_job_name(&mut self, job_name: impl Into<String>) {
        let job_name = job_name.into();
        if !job_name.trim().is_empty() {
            self.job_name = Some(job_name);
        }
    }

    pub fn is_fully_defined(&self) -> bool {
        self.name.is_some() && self.job_name.is_some()
    }

    /// Copies over whatever `other` knows that this combatant does not.
    pub(crate) fn fill_from(&mut self, other: Combatant) {
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.job_name.is_none() {
            self.job_name = other.job_name;
        }
    }

    pub fn raw(&self) -> RawCombatant {
        RawCombatant {
            guid: self.guid.clone(),
            job_name: self.job_name.clone(),
            name: self.name.clone(),
        }
    }
}
