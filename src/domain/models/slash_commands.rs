#[cfg(test)]
#[path = "slash_commands_test.rs"]
mod tests;

pub struct SlashCommand {
    command: String,
    pub args: Vec<String>,
}

impl SlashCommand {
    pub fn parse(text: &str) -> Option<SlashCommand> {
        let mut args = text
            .trim()
            .split(' ')
            .filter(|e| return !e.is_empty())
            .map(|e| return e.to_string())
            .collect::<Vec<String>>();
        if args.is_empty() {
            return None;
        }
        let prefix = args.remove(0);

        let cmd = SlashCommand {
            command: prefix,
            args,
        };
        if cmd.is_quit()
            || cmd.is_stop()
            || cmd.is_thread_list()
            || cmd.is_thread_switch()
            || cmd.is_thread_new()
            || cmd.is_help()
        {
            return Some(cmd);
        }

        return None;
    }

    pub fn is_quit(&self) -> bool {
        return ["/q", "/quit", "/exit"].contains(&self.command.as_str());
    }

    pub fn is_stop(&self) -> bool {
        return ["/s", "/stop"].contains(&self.command.as_str());
    }

    pub fn is_thread_list(&self) -> bool {
        return ["/t", "/threads"].contains(&self.command.as_str());
    }

    pub fn is_thread_switch(&self) -> bool {
        return ["/sw", "/switch"].contains(&self.command.as_str());
    }

    pub fn is_thread_new(&self) -> bool {
        return ["/n", "/new"].contains(&self.command.as_str());
    }

    pub fn is_help(&self) -> bool {
        return ["/h", "/help"].contains(&self.command.as_str());
    }

    /// Arguments joined back into a single string, e.g. a thread title.
    pub fn rest(&self) -> String {
        return self.args.join(" ");
    }
}
