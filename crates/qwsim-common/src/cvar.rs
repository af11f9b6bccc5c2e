// cvar.rs -- dynamic variable tracking
//
// Movement tunables and prediction switches are all cvars so that server and
// client can be configured from the same surface.

use std::collections::HashMap;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        /// set to cause it to be saved to a config file
        const ARCHIVE    = 0x01;
        /// added to serverinfo when changed
        const SERVERINFO = 0x04;
    }
}

/// A console variable.
#[derive(Clone, Debug)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: CvarFlags,
    pub value: f32,
}

/// The full cvar system context.
#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    /// O(1) cvar lookup by name -> index in cvar_vars
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a cvar by name. O(1) via HashMap.
    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Get or create a cvar. If it already exists, the value is not changed
    /// but flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: CvarFlags) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            flags,
            value: value.parse::<f32>().unwrap_or(0.0),
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    /// Set a cvar value, creating it if needed.
    pub fn set(&mut self, name: &str, value: &str) -> usize {
        let idx = match self.cvar_index.get(name) {
            Some(&idx) => idx,
            None => return self.get(name, value, CvarFlags::empty()),
        };

        let var = &mut self.cvar_vars[idx];
        if value != var.string {
            var.string = value.to_string();
            var.value = value.parse::<f32>().unwrap_or(0.0);
        }
        idx
    }

    /// Build a `\key\value` info string from all SERVERINFO cvars.
    pub fn serverinfo(&self) -> String {
        let mut info = String::new();
        for var in self
            .cvar_vars
            .iter()
            .filter(|v| v.flags.contains(CvarFlags::SERVERINFO))
        {
            info.push('\\');
            info.push_str(&var.name);
            info.push('\\');
            info.push_str(&var.string);
        }
        info
    }

    /// Apply `+set name value` pairs from a command line.
    pub fn apply_command_line(&mut self, args: &[String]) {
        let mut i = 0;
        while i < args.len() {
            if args[i] == "+set" && i + 2 < args.len() {
                self.set(&args[i + 1], &args[i + 2]);
                i += 3;
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(ctx: &CvarContext, name: &str) -> Option<f32> {
        ctx.find_var(name).map(|v| v.value)
    }

    #[test]
    fn test_get_creates_and_parses() {
        let mut ctx = CvarContext::new();
        ctx.get("sv_gravity", "800", CvarFlags::SERVERINFO);
        assert_eq!(value(&ctx, "sv_gravity"), Some(800.0));
        assert_eq!(ctx.find_var("sv_gravity").map(|v| v.string.as_str()), Some("800"));
        assert_eq!(value(&ctx, "missing"), None);
    }

    #[test]
    fn test_get_existing_keeps_value_ors_flags() {
        let mut ctx = CvarContext::new();
        let a = ctx.get("cl_nopred", "0", CvarFlags::empty());
        ctx.set("cl_nopred", "1");
        let b = ctx.get("cl_nopred", "0", CvarFlags::ARCHIVE);
        assert_eq!(a, b);
        assert_eq!(value(&ctx, "cl_nopred"), Some(1.0));
        assert!(ctx.find_var("cl_nopred").is_some_and(|v| v.flags.contains(CvarFlags::ARCHIVE)));
    }

    #[test]
    fn test_set_unparsable_reads_as_zero() {
        let mut ctx = CvarContext::new();
        ctx.get("sim_fps", "72", CvarFlags::empty());
        ctx.set("sim_fps", "fast");
        assert_eq!(value(&ctx, "sim_fps"), Some(0.0));
        assert_eq!(ctx.find_var("sim_fps").map(|v| v.string.as_str()), Some("fast"));
    }

    #[test]
    fn test_serverinfo_only_lists_serverinfo_vars() {
        let mut ctx = CvarContext::new();
        ctx.get("sv_gravity", "800", CvarFlags::SERVERINFO);
        ctx.get("cl_nopred", "0", CvarFlags::empty());
        ctx.get("sv_friction", "4", CvarFlags::SERVERINFO);
        assert_eq!(ctx.serverinfo(), "\\sv_gravity\\800\\sv_friction\\4");
    }

    #[test]
    fn test_apply_command_line() {
        let mut ctx = CvarContext::new();
        let args: Vec<String> = ["qwsim", "+set", "sv_gravity", "400", "+set", "latency"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ctx.apply_command_line(&args);
        assert_eq!(value(&ctx, "sv_gravity"), Some(400.0));
        assert!(ctx.find_var("latency").is_none(), "incomplete +set is ignored");
    }
}
