#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TerminationState {
    Running,
    Finished,
    Killed,
}

impl TerminationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Killed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Killed => "killed",
        }
    }
}

impl std::str::FromStr for TerminationState {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "killed" => Ok(Self::Killed),
            _ => Err(()),
        }
    }
}
